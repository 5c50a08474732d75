//! Stream error types.
//!
//! Provides error types for stream client operations.

use std::fmt;

/// Stream client errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Connection failed.
    Connection(String),

    /// Malformed or unexpected inbound message.
    Protocol(String),

    /// Failed to serialize an outbound message.
    Serialization(String),

    /// Invalid configuration.
    InvalidConfig(String),

    /// Send failed.
    SendFailed(String),

    /// The client was closed.
    Closed,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection failed: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Serialization(msg) => write!(f, "serialization failed: {}", msg),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::SendFailed(msg) => write!(f, "send failed: {}", msg),
            Self::Closed => write!(f, "client closed"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_connection_display() {
        let err = StreamError::Connection("timeout".to_string());
        assert_eq!(err.to_string(), "connection failed: timeout");
    }

    #[test]
    fn test_stream_error_protocol_display() {
        let err = StreamError::Protocol("unknown event kind".to_string());
        assert_eq!(err.to_string(), "protocol error: unknown event kind");
    }

    #[test]
    fn test_stream_error_invalid_config_display() {
        let err = StreamError::InvalidConfig("url cannot be empty".to_string());
        assert_eq!(err.to_string(), "invalid configuration: url cannot be empty");
    }

    #[test]
    fn test_stream_error_closed_display() {
        assert_eq!(StreamError::Closed.to_string(), "client closed");
    }
}
