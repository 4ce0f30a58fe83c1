//! Acceptor configuration.
//!
//! [`AcceptorConfig`] is resolved once by the caller and handed to
//! [`BillAcceptor::new`](crate::BillAcceptor::new); nothing is read from
//! ambient configuration at runtime.

use std::time::Duration;

use billgate_core::constants::{
    DEFAULT_ESCROW_ARM_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS, ONLINE,
};
use billgate_core::{AcceptancePolicyConfig, Error, Result, reserved_signal_name};
use serde::{Deserialize, Serialize};

/// Settings for one bill acceptor.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_acceptor::AcceptorConfig;
///
/// let config = AcceptorConfig::default()
///     .with_poll_interval(Duration::from_millis(300))
///     .with_simulation(true);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.online_signals, vec![0x3F]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptorConfig {
    /// Denomination map and allow-list.
    pub policy: AcceptancePolicyConfig,

    /// Cadence of keep-alive poll bytes.
    pub poll_interval: Duration,

    /// How long one byte read waits before the read loop checks for
    /// cancellation and idle work.
    pub read_timeout: Duration,

    /// How long after bill-validated a bill-type byte is still expected.
    pub escrow_arm_timeout: Duration,

    /// Bytes the device uses to report it is online.
    pub online_signals: Vec<u8>,

    /// Allow [`simulate_insert`](crate::BillAcceptor::simulate_insert).
    pub simulation_enabled: bool,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            policy: AcceptancePolicyConfig::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            escrow_arm_timeout: Duration::from_millis(DEFAULT_ESCROW_ARM_TIMEOUT_MS),
            online_signals: vec![ONLINE],
            simulation_enabled: false,
        }
    }
}

impl AcceptorConfig {
    /// Replace the acceptance policy.
    pub fn with_policy(mut self, policy: AcceptancePolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Set the poll cadence.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the escrow arm timeout.
    pub fn with_escrow_arm_timeout(mut self, timeout: Duration) -> Self {
        self.escrow_arm_timeout = timeout;
        self
    }

    /// Set the online indicator bytes.
    pub fn with_online_signals(mut self, signals: impl IntoIterator<Item = u8>) -> Self {
        self.online_signals = signals.into_iter().collect();
        self
    }

    /// Enable or disable simulated insertion.
    pub fn with_simulation(mut self, enabled: bool) -> Self {
        self.simulation_enabled = enabled;
        self
    }

    /// Check the policy, timings and online bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy is invalid, a timing is zero, or an
    /// online byte collides with a status byte, a fault code or a bill-type
    /// code.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;

        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("read_timeout", self.read_timeout),
            ("escrow_arm_timeout", self.escrow_arm_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidTiming(format!("{name} must be greater than zero")));
            }
        }

        for &byte in &self.online_signals {
            if let Some(signal) = reserved_signal_name(byte) {
                return Err(Error::Config(format!(
                    "Online signal 0x{byte:02x} collides with {signal}"
                )));
            }
            if self.policy.denominations.contains_code(byte) {
                return Err(Error::Config(format!(
                    "Online signal 0x{byte:02x} collides with a bill type code"
                )));
            }
        }

        Ok(())
    }
}
