//! # Link Module
//!
//! Owns the connection to the vehicle.
//!
//! This module handles:
//! - Resolving an ordered list of candidate endpoints to one live session
//! - Keeping at most one session open process-wide
//! - Draining queued inbound messages without blocking the poll cycle

pub mod drain;
pub mod endpoint;
pub mod manager;
pub mod session;
pub mod transport;

pub use drain::{drain, DrainResult, RadioStatusSample};
pub use endpoint::LinkEndpoint;
pub use manager::{LinkManager, LinkSettings};
pub use session::LinkSession;

/// Lifecycle of the vehicle link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

impl LinkState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LinkState::Unconnected => 0,
            LinkState::Connecting => 1,
            LinkState::Connected => 2,
            LinkState::Closed => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Connecting,
            2 => LinkState::Connected,
            3 => LinkState::Closed,
            _ => LinkState::Unconnected,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::Unconnected => "unconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
        };
        f.write_str(name)
    }
}
