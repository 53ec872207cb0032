//! Error types for the controller link.
//!
//! Framing problems, checksum mismatches and unrecognized payloads are not
//! errors: the codec recovers from them locally and only logs them. What ends
//! up here is configuration trouble, transport failures and requests the link
//! state machine cannot honour in its current state.

use std::time::Duration;
use thiserror::Error;

use crate::link::LinkStatus;

/// Result type alias for link operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Failed to parse configuration")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to read configuration file")]
    ConfigRead(#[from] std::io::Error),

    #[error("Payload of {len} bytes does not fit a one-byte length field")]
    PayloadTooLarge { len: usize },

    #[error("Bluetooth error")]
    Ble(#[from] bluest::Error),

    #[error("Default Bluetooth adapter not found")]
    AdapterUnavailable,

    #[error("Device '{name}' not found")]
    DeviceNotFound { name: String },

    #[error("The device does not support the Nordic UART service")]
    ServiceMissing,

    #[error("The device does not support the Nordic UART {role} characteristic")]
    CharacteristicMissing { role: &'static str },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connect attempt timed out after {duration:?}")]
    ConnectTimeout { duration: Duration },

    #[error("Cannot {action} while {from:?}")]
    InvalidTransition { from: LinkStatus, action: &'static str },

    #[error("Session is no longer running")]
    SessionClosed,
}

impl Error {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }

    /// Whether another connect attempt could plausibly succeed.
    ///
    /// Transport failures are always retried by the reconnect policy; only
    /// configuration and caller mistakes are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::AdapterUnavailable
                | Self::DeviceNotFound { .. }
                | Self::ServiceMissing
                | Self::CharacteristicMissing { .. }
                | Self::NotConnected
                | Self::ConnectTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_retryable() {
        assert!(Error::DeviceNotFound { name: "VESC".into() }.is_retryable());
        assert!(Error::ConnectTimeout { duration: Duration::from_secs(10) }.is_retryable());
        assert!(Error::CharacteristicMissing { role: "notify" }.is_retryable());
    }

    #[test]
    fn caller_mistakes_are_final() {
        assert!(!Error::invalid_config("pollIntervalMs must be > 0").is_retryable());
        let err = Error::InvalidTransition { from: LinkStatus::Connected, action: "connect" };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Cannot connect while Connected");
    }
}
