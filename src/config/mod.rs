use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gnss::PpsMode;
use crate::serial::interface::DEFAULT_BAUD_RATE;

pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TRANSPORT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PM_SETTLE_MS: u64 = 500;
pub const DEFAULT_PPS_PULSE_WIDTH: u16 = 100;
pub const DEFAULT_PMTK_BUFFER_SIZE: usize = 32;
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 256;
pub const DEFAULT_SENTENCE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-module settings, the equivalent of one hardware description entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lx6Config {
    /// Serial device the module is wired to (binary only; library users pass a transport)
    pub port: Option<String>,
    pub baud_rate: u32,
    pub pps_mode: PpsMode,
    /// PPS pulse width in milliseconds
    pub pps_pulse_width: u16,
    pub script_timeout_ms: u64,
    pub transport_timeout_ms: u64,
    /// Minimum settle time between two power transitions
    pub pm_settle_ms: u64,
    /// Capacity of each PMTK scratch buffer (request and expected response)
    pub pmtk_buffer_size: usize,
    pub receive_buffer_size: usize,
    /// Backlog kept for slow sentence subscribers
    pub sentence_capacity: usize,
}

impl Default for Lx6Config {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            pps_mode: PpsMode::default(),
            pps_pulse_width: DEFAULT_PPS_PULSE_WIDTH,
            script_timeout_ms: DEFAULT_SCRIPT_TIMEOUT_MS,
            transport_timeout_ms: DEFAULT_TRANSPORT_TIMEOUT_MS,
            pm_settle_ms: DEFAULT_PM_SETTLE_MS,
            pmtk_buffer_size: DEFAULT_PMTK_BUFFER_SIZE,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            sentence_capacity: DEFAULT_SENTENCE_CAPACITY,
        }
    }
}

impl Lx6Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receive_buffer_size == 0 {
            return Err(ConfigError::Invalid("receive_buffer_size must be non-zero".into()));
        }
        if self.sentence_capacity == 0 {
            return Err(ConfigError::Invalid("sentence_capacity must be non-zero".into()));
        }
        if self.script_timeout_ms == 0 {
            return Err(ConfigError::Invalid("script_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    pub fn pm_settle(&self) -> Duration {
        Duration::from_millis(self.pm_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = Lx6Config::from_json_str(r#"{ "pps_mode": "enabled_after_lock", "pps_pulse_width": 50 }"#)
            .expect("valid config");
        assert_eq!(config.pps_mode, PpsMode::EnabledAfterLock);
        assert_eq!(config.pps_pulse_width, 50);
        assert_eq!(config.pm_settle(), Duration::from_millis(DEFAULT_PM_SETTLE_MS));
        assert_eq!(config.script_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn zero_buffers_are_rejected() {
        let err = Lx6Config::from_json_str(r#"{ "sentence_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
