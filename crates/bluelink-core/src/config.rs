//! Timeouts and targets for sessions and test runs.

use std::time::Duration;

use bluelink_types::CharacteristicRef;
use bluelink_types::uuids::{BODY_SENSOR_LOCATION, HEART_RATE_SERVICE};

use crate::error::{Error, Result};

/// Default scan window.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Delay after the link comes up before GATT operations are allowed.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Default timeout for establishing a link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single read, write or notification change.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for bonding to reach a terminal state.
pub const DEFAULT_BOND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts used by [`SessionController`](crate::session::SessionController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a scan waits for a matching device.
    pub scan_timeout: Duration,
    /// Pause after the link reports connected.
    pub settle_delay: Duration,
    /// Timeout for the link to come up.
    pub connect_timeout: Duration,
    /// Timeout for service discovery.
    pub discovery_timeout: Duration,
    /// Timeout for read, write and notification changes.
    pub operation_timeout: Duration,
    /// Timeout for bonding.
    pub bond_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            bond_timeout: DEFAULT_BOND_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan timeout.
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the post-connect settle delay. Zero disables it.
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the timeout for read, write and notification changes.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the bonding timeout.
    #[must_use]
    pub fn bond_timeout(mut self, timeout: Duration) -> Self {
        self.bond_timeout = timeout;
        self
    }

    /// Reject zero timeouts. The settle delay may be zero.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("scan_timeout", self.scan_timeout),
            ("connect_timeout", self.connect_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("operation_timeout", self.operation_timeout),
            ("bond_timeout", self.bond_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Configuration for [`TestRunner`](crate::runner::TestRunner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub session: SessionConfig,
    /// Characteristic read by the read test.
    pub read_target: CharacteristicRef,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            read_target: CharacteristicRef::new(HEART_RATE_SERVICE, BODY_SENSOR_LOCATION),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn read_target(mut self, target: CharacteristicRef) -> Self {
        self.read_target = target;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_millis(10_000));
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.bond_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new()
            .scan_timeout(Duration::from_secs(3))
            .settle_delay(Duration::ZERO)
            .operation_timeout(Duration::from_secs(1));
        assert_eq!(config.scan_timeout, Duration::from_secs(3));
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.operation_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let err = SessionConfig::new()
            .scan_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("scan_timeout"));
    }

    #[test]
    fn test_runner_config_default_target() {
        let config = RunnerConfig::default();
        assert_eq!(config.read_target.service, HEART_RATE_SERVICE);
        assert_eq!(config.read_target.characteristic, BODY_SENSOR_LOCATION);
    }
}
