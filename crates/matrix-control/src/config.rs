//! Controller configuration

use std::time::Duration;

use matrix_protocol::{MatrixSize, DEFAULT_STATUS_COMMAND};
use serde::{Deserialize, Serialize};

/// Settings for one matrix controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Serial port path
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    /// Status dump command without terminator; empty disables polling
    #[serde(default = "default_status_command")]
    pub status_command: String,
    /// Seconds between status polls (values below 1 are treated as 1)
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
    /// Matrix size
    #[serde(default)]
    pub size: MatrixSize,
}

fn default_baud() -> u32 {
    9600
}

fn default_status_command() -> String {
    DEFAULT_STATUS_COMMAND.to_string()
}

fn default_poll_seconds() -> u64 {
    5
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud(),
            status_command: default_status_command(),
            poll_seconds: default_poll_seconds(),
            size: MatrixSize::default(),
        }
    }
}

impl ControllerConfig {
    /// Create a configuration for a port with default settings
    pub fn new(port: impl Into<String>, size: MatrixSize) -> Self {
        Self {
            port: port.into(),
            size,
            ..Default::default()
        }
    }

    /// Status command, or None when polling is disabled
    pub fn status_command(&self) -> Option<&str> {
        let cmd = self.status_command.trim();
        (!cmd.is_empty()).then_some(cmd)
    }

    /// Interval between polls, never shorter than one second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.status_command(), Some("STMAP"));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.size, MatrixSize::FourByFour);
    }

    #[test]
    fn test_blank_status_command_disables_polling() {
        let config = ControllerConfig {
            status_command: "   ".into(),
            ..Default::default()
        };
        assert_eq!(config.status_command(), None);
    }

    #[test]
    fn test_poll_interval_is_at_least_one_second() {
        let config = ControllerConfig {
            poll_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{ "port": "/dev/ttyS1", "size": "8x8" }"#).unwrap();
        assert_eq!(config.port, "/dev/ttyS1");
        assert_eq!(config.size, MatrixSize::EightByEight);
        assert_eq!(config.status_command, "STMAP");
    }
}
