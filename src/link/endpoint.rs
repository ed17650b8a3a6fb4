//! # Link Endpoints
//!
//! Candidate transport addresses the link resolver tries in order.
//!
//! Address syntax:
//!
//! | Address | Transport |
//! |---------|-----------|
//! | `udp:127.0.0.1:14551` | bind and listen (fed by a MAVLink router) |
//! | `tcp:127.0.0.1:5760` | connect |
//! | `serial:/dev/ttyUSB0` | serial port at the endpoint's baud |
//! | `/dev/ttyUSB0`, `COM3` | serial port (prefix optional) |

use serde::Deserialize;
use std::fmt;

use crate::error::{MonitorError, Result};

/// Default telemetry radio baud rate
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// One candidate link address with its transport parameters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkEndpoint {
    pub address: String,

    /// Ignored for network endpoints
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 { DEFAULT_BAUD_RATE }

/// Parsed transport kind of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    /// Local `host:port` to bind
    Udp(String),
    /// Remote `host:port` to connect to
    Tcp(String),
    /// Device path
    Serial(String),
}

impl LinkEndpoint {
    pub fn new(address: impl Into<String>, baud: u32) -> Self {
        Self {
            address: address.into(),
            baud,
        }
    }

    /// Parse the address into a transport kind
    ///
    /// # Errors
    ///
    /// Returns error if the address is empty or a network address lacks a
    /// valid `host:port`
    ///
    /// # Examples
    ///
    /// ```
    /// use uav_monitor::link::endpoint::{EndpointKind, LinkEndpoint};
    ///
    /// let endpoint = LinkEndpoint::new("udp:127.0.0.1:14551", 57600);
    /// assert_eq!(endpoint.kind().unwrap(), EndpointKind::Udp("127.0.0.1:14551".into()));
    /// ```
    pub fn kind(&self) -> Result<EndpointKind> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(MonitorError::Link("endpoint address cannot be empty".to_string()));
        }

        if let Some(rest) = address.strip_prefix("udpin:").or_else(|| address.strip_prefix("udp:")) {
            return Ok(EndpointKind::Udp(parse_host_port(address, rest)?));
        }

        if let Some(rest) = address.strip_prefix("tcp:") {
            return Ok(EndpointKind::Tcp(parse_host_port(address, rest)?));
        }

        let path = address.strip_prefix("serial:").unwrap_or(address);
        if path.is_empty() {
            return Err(MonitorError::Link(format!("serial endpoint {} has no device path", address)));
        }
        Ok(EndpointKind::Serial(path.to_string()))
    }
}

fn parse_host_port(address: &str, rest: &str) -> Result<String> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| MonitorError::Link(format!("{} is missing a port", address)))?;

    if host.is_empty() {
        return Err(MonitorError::Link(format!("{} is missing a host", address)));
    }
    port.parse::<u16>()
        .map_err(|_| MonitorError::Link(format!("{} has an invalid port", address)))?;

    Ok(rest.to_string())
}

impl fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Ok(EndpointKind::Serial(_)) => write!(f, "{}@{}", self.address, self.baud),
            _ => write!(f, "{}", self.address),
        }
    }
}
