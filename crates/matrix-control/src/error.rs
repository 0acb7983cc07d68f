//! Error types for the controller

use thiserror::Error;

/// Errors that can occur while talking to the matrix
#[derive(Debug, Error)]
pub enum ControlError {
    /// The serial device could not be opened
    #[error("failed to open {port}: {reason}")]
    Connection {
        /// Port path (or virtual device name)
        port: String,
        /// Reason reported by the driver
        reason: String,
    },

    /// I/O error on an open connection (includes write timeouts)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Returns true if the device could not be reached at all
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
