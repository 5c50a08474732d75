//! Stream client configuration.
//!
//! Provides configuration options for the stream client.

use std::time::Duration;

use super::error::StreamError;

/// Default stream URL.
pub const DEFAULT_STREAM_URL: &str = "wss://streams.flowline.example/v1/stream";

/// Default initial reconnect delay in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;

/// Maximum reconnect delay in seconds.
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Stream client configuration.
///
/// Reconnect attempts are unbounded: the client keeps retrying with a
/// capped exponential backoff until it is explicitly closed.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream server URL.
    pub url: String,

    /// Initial reconnect delay.
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,

    /// Apply full jitter to reconnect delays.
    pub jitter: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_reconnect_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
            jitter: true,
        }
    }
}

impl StreamConfig {
    /// Creates a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the initial reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnect delay.
    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Enables or disables reconnect jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.url.is_empty() {
            return Err(StreamError::InvalidConfig(
                "url cannot be empty".to_string(),
            ));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(StreamError::InvalidConfig(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.reconnect_delay > self.max_reconnect_delay {
            return Err(StreamError::InvalidConfig(
                "reconnect_delay cannot exceed max_reconnect_delay".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = StreamConfig::default();
        assert_eq!(config.url, DEFAULT_STREAM_URL);
        assert_eq!(
            config.reconnect_delay,
            Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS)
        );
        assert_eq!(
            config.max_reconnect_delay,
            Duration::from_secs(MAX_RECONNECT_DELAY_SECS)
        );
        assert!(config.jitter);
    }

    #[test]
    fn test_config_new() {
        let config = StreamConfig::new("wss://example.com/stream");
        assert_eq!(config.url, "wss://example.com/stream");
    }

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::new("wss://example.com/stream")
            .with_reconnect_delay(Duration::from_millis(500))
            .with_max_reconnect_delay(Duration::from_secs(10))
            .with_jitter(false);

        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(10));
        assert!(!config.jitter);
    }

    #[test]
    fn test_config_validate_valid() {
        let config = StreamConfig::new("ws://localhost:3000/stream");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_empty_url() {
        let config = StreamConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_invalid_scheme() {
        let config = StreamConfig::new("https://example.com/stream");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_delay_ordering() {
        let config = StreamConfig::new("wss://example.com/stream")
            .with_reconnect_delay(Duration::from_secs(60))
            .with_max_reconnect_delay(Duration::from_secs(30));
        assert!(config.validate().is_err());
    }
}
