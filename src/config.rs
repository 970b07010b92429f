//! Startup configuration for the link and the tooling built on it.

use crate::constants::*;
use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime settings, loadable from TOML.
///
/// Every field has a default, so a config file only lists what differs:
///
/// ```
/// use stepper_link::LinkConfig;
///
/// let config = LinkConfig::from_toml_str("port = \"/dev/ttyACM0\"\nbacklog_limit = 3").unwrap();
/// assert_eq!(config.baud_rate, 115_200);
/// assert_eq!(config.backlog_limit, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Hold the first frame until the device reports it is ready
    pub wait_for_ready: bool,
    pub max_in_flight: usize,
    /// Backlog at which axis controllers stop issuing and poll instead
    pub backlog_limit: usize,
    pub poll_interval_ms: u64,
    /// Scheduler grouping threshold in clock ticks
    pub min_activation_delay: u32,
    pub trace_tx: bool,
    pub trace_rx: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: BAUD_RATE,
            read_timeout_ms: TIMEOUT_MS,
            wait_for_ready: true,
            max_in_flight: MAX_IN_FLIGHT,
            backlog_limit: BACKLOG_LIMIT,
            poll_interval_ms: POLL_INTERVAL_MS,
            min_activation_delay: 0,
            trace_tx: false,
            trace_rx: false,
        }
    }
}

impl LinkConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: LinkConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 || self.max_in_flight > MAX_IN_FLIGHT {
            return Err(LinkError::Config(format!(
                "max_in_flight must be within 1..={MAX_IN_FLIGHT}, got {}",
                self.max_in_flight
            )));
        }
        if self.backlog_limit == 0 {
            return Err(LinkError::Config("backlog_limit must be positive".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::Config("baud_rate must be positive".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(LinkError::Config("read_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = LinkConfig::from_toml_str("").unwrap();
        assert_eq!(config, LinkConfig::default());
        assert_eq!(config.max_in_flight, 7);
    }

    #[test]
    fn rejects_window_larger_than_device_queue() {
        let err = LinkConfig::from_toml_str("max_in_flight = 8").unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = LinkConfig::from_toml_str("baud_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, LinkError::ConfigParse(_)));
    }
}
