//! # Error Types
//!
//! Custom error types for UAV Monitor using `thiserror`.

use thiserror::Error;

/// Main error type for UAV Monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No candidate endpoint could be opened and handshaken
    #[error("Link error: {0}")]
    Link(String),

    /// MAVLink framing or payload errors
    #[error("MAVLink protocol error: {0}")]
    Protocol(String),

    /// Connected, but the vehicle state could not be read
    #[error("Telemetry read error: {0}")]
    Read(String),

    /// Durable store unavailable or returned something unusable
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Record (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Subscriber setup errors
    #[error("Logging error: {0}")]
    Logging(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for UAV Monitor
pub type Result<T> = std::result::Result<T, MonitorError>;
