//! Daemon settings

use std::path::{Path, PathBuf};

use matrix_control::ControllerConfig;
use matrix_protocol::{MatrixSize, DEFAULT_STATUS_COMMAND};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or saving the settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Neither `$XDG_CONFIG_HOME` nor a home directory is available
    #[error("could not determine settings path")]
    NoConfigDir,

    /// The file exists but could not be read or written
    #[error("failed to access {path}: {source}")]
    Io {
        /// Settings file path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid settings JSON
    #[error("invalid settings in {path}: {source}")]
    Parse {
        /// Settings file path
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },
}

/// Persisted matrix settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Serial port path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Status dump command (empty disables polling)
    pub status_command: String,
    /// Seconds between status polls
    pub poll_seconds: u64,
    /// Matrix size
    pub size: MatrixSize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            status_command: DEFAULT_STATUS_COMMAND.to_string(),
            poll_seconds: 5,
            size: MatrixSize::FourByFour,
        }
    }
}

/// Values given on the command line, each replacing the file's value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub status_command: Option<String>,
    pub poll_seconds: Option<u64>,
    pub size: Option<MatrixSize>,
}

impl Settings {
    /// `$XDG_CONFIG_HOME/matrixd`, falling back to `~/.config/matrixd`
    pub fn config_dir() -> Option<PathBuf> {
        config_dir_from(std::env::var("XDG_CONFIG_HOME").ok(), dirs::home_dir())
    }

    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save settings to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Replace every value that was given on the command line
    pub fn apply(&mut self, overrides: SettingsOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(baud_rate) = overrides.baud_rate {
            self.baud_rate = baud_rate;
        }
        if let Some(status_command) = overrides.status_command {
            self.status_command = status_command;
        }
        if let Some(poll_seconds) = overrides.poll_seconds {
            self.poll_seconds = poll_seconds;
        }
        if let Some(size) = overrides.size {
            self.size = size;
        }
    }

    /// Controller configuration for these settings
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            status_command: self.status_command.trim().to_string(),
            poll_seconds: self.poll_seconds,
            size: self.size,
        }
    }
}

fn config_dir_from(xdg_config: Option<String>, home: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(xdg_config) = xdg_config {
        let path = PathBuf::from(xdg_config);
        if path.is_absolute() {
            return Some(path.join("matrixd"));
        }
    }

    home.map(|h| h.join(".config").join("matrixd"))
}
