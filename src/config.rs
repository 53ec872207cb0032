//! Link timing and resource limits.
//!
//! Keys are camelCase so a TOML file reads the same as the option names used
//! elsewhere (`pollIntervalMs`, `staleTimeoutMs`, ...). Every key is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::MAX_FRAME_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkConfig {
    /// GET_VALUES period while connected
    pub poll_interval_ms: u64,
    /// Longest tolerated data silence once the grace period is over
    pub stale_timeout_ms: u64,
    /// Window after connecting during which silence is expected
    pub grace_period_ms: u64,
    /// Spacing between reconnect attempts
    pub reconnect_interval_ms: u64,
    /// ALIVE period while connected. 0 disables the heartbeat
    pub heartbeat_interval_ms: u64,
    /// Upper bound on a single transport connect call
    pub connect_timeout_ms: u64,
    /// Inbound buffer cap in bytes
    pub max_buffer_len: usize,
    /// Capacity of the transport event queue
    pub event_queue_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            stale_timeout_ms: 3_000,
            grace_period_ms: 5_000,
            reconnect_interval_ms: 5_000,
            heartbeat_interval_ms: 0,
            connect_timeout_ms: 10_000,
            max_buffer_len: 1_024,
            event_queue_len: 64,
        }
    }
}

impl LinkConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("pollIntervalMs", self.poll_interval_ms),
            ("staleTimeoutMs", self.stale_timeout_ms),
            ("gracePeriodMs", self.grace_period_ms),
            ("reconnectIntervalMs", self.reconnect_interval_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| *value == 0) {
            return Err(Error::invalid_config(format!("{name} must be greater than 0")));
        }
        if self.max_buffer_len < MAX_FRAME_LEN {
            return Err(Error::invalid_config(format!(
                "maxBufferLen must be at least {MAX_FRAME_LEN} to hold a full frame"
            )));
        }
        if self.event_queue_len == 0 {
            return Err(Error::invalid_config("eventQueueLen must be greater than 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        LinkConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LinkConfig::from_toml_str(
            r#"
            pollIntervalMs = 250
            heartbeatIntervalMs = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(1)));
        assert_eq!(config.stale_timeout_ms, LinkConfig::default().stale_timeout_ms);
    }

    #[test]
    fn test_heartbeat_disabled_by_default() {
        assert_eq!(LinkConfig::default().heartbeat_interval(), None);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = LinkConfig::from_toml_str("staleTimeoutMs = 0").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref reason } if reason.contains("staleTimeoutMs")));
    }

    #[test]
    fn test_small_buffer_rejected() {
        let config = LinkConfig { max_buffer_len: 64, ..LinkConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = LinkConfig::from_toml_str("pollInterval = 5").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
