//! Timing knobs for the two watchdogs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_THINKING_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STALLED_SWEEP_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_RETRY_SWEEP_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long an operator may hold a tentative assignment before it is
    /// taken back and offered elsewhere.
    pub thinking_timeout_secs: u64,
    /// Period of the stalled-assignment sweep.
    pub stalled_sweep_interval_secs: u64,
    /// Period of the undeliverable-task retry sweep.
    pub retry_sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            thinking_timeout_secs: DEFAULT_THINKING_TIMEOUT_SECS,
            stalled_sweep_interval_secs: DEFAULT_STALLED_SWEEP_INTERVAL_SECS,
            retry_sweep_interval_secs: DEFAULT_RETRY_SWEEP_INTERVAL_SECS,
        }
    }
}

impl QueueConfig {
    pub fn thinking_timeout(&self) -> Duration {
        Duration::from_secs(self.thinking_timeout_secs)
    }

    pub fn stalled_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_sweep_interval_secs)
    }

    pub fn retry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retry_sweep_interval_secs)
    }

    /// Reject values that would make a sweep spin or reclaim instantly.
    pub fn validate(&self) -> Result<(), String> {
        if self.thinking_timeout_secs == 0 {
            return Err("thinking_timeout_secs must be greater than zero".into());
        }
        if self.stalled_sweep_interval_secs == 0 {
            return Err("stalled_sweep_interval_secs must be greater than zero".into());
        }
        if self.retry_sweep_interval_secs == 0 {
            return Err("retry_sweep_interval_secs must be greater than zero".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = QueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thinking_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn zero_interval_rejected() {
        let config = QueueConfig {
            retry_sweep_interval_secs: 0,
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"thinking_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.thinking_timeout_secs, 5);
        assert_eq!(config.stalled_sweep_interval_secs, DEFAULT_STALLED_SWEEP_INTERVAL_SECS);
    }
}
