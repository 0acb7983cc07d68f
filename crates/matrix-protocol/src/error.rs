//! Error types for matrix protocol parsing

use thiserror::Error;

/// Errors that can occur while parsing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line does not have the `o..i..` shape of a status entry
    #[error("not a status line: {0:?}")]
    NotAStatusLine(String),

    /// A numeric field could not be decoded
    #[error("invalid {field} field: {text:?}")]
    InvalidField {
        /// Which field failed (`output` or `input`)
        field: &'static str,
        /// The offending text
        text: String,
    },

    /// Command line could not be decoded
    #[error("invalid command: {0:?}")]
    InvalidCommand(String),

    /// Unsupported matrix size
    #[error("unsupported matrix size: {0:?} (expected 4x4 or 8x8)")]
    InvalidSize(String),
}
