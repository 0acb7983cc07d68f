//! Binary B-100/300 Matrix Protocol Library
//!
//! This crate provides encoding and parsing for the RS-232 text command set
//! spoken by Binary B-100/300 series HDMI matrix switchers.
//!
//! # Format
//!
//! Every command is a short ASCII line terminated by a carriage return.
//! Output and input numbers are always zero-padded to two digits:
//!
//! - `0103\r` - route output 1 to input 3
//! - `02+\r` / `02-\r` - step the input on output 2
//! - `02L\r` / `0200\r` - output 2 on / off
//! - `STMAP\r` - status dump, answered with one `o<NN>i<NN>` line per output
//!
//! The device has no error channel: malformed or out-of-range commands are
//! simply ignored on the wire, so callers validate before encoding.
//!
//! # Example
//!
//! ```rust
//! use matrix_protocol::{parse_status, EncodeCommand, MatrixCommand};
//!
//! let cmd = MatrixCommand::Route { output: 1, input: 3 };
//! assert_eq!(cmd.encode(), b"0103\r");
//!
//! let entries = parse_status("o01i03\r\no02i00\r\n");
//! assert_eq!(entries.len(), 2);
//! assert!(entries[1].is_powered_off());
//! ```

pub mod command;
pub mod error;
pub mod identity;
pub mod status;

use std::fmt;
use std::str::FromStr;

pub use command::{CommandCodec, MatrixCommand, StepDirection};
pub use error::ParseError;
pub use identity::{parse_firmware_reply, parse_ip_reply};
pub use status::{format_status_report, parse_status, parse_status_line, StatusEntry};

/// Command terminator used by the device
pub const TERMINATOR: u8 = b'\r';

/// Default status dump command (without terminator)
pub const DEFAULT_STATUS_COMMAND: &str = "STMAP";

/// Physical size of the matrix (outputs x inputs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatrixSize {
    /// 4 inputs, 4 outputs
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "4x4"))]
    FourByFour,
    /// 8 inputs, 8 outputs
    #[cfg_attr(feature = "serde", serde(rename = "8x8"))]
    EightByEight,
}

impl MatrixSize {
    /// Number of outputs (and inputs)
    pub fn dimension(&self) -> u8 {
        match self {
            Self::FourByFour => 4,
            Self::EightByEight => 8,
        }
    }

    /// Build from a dimension of 4 or 8
    pub fn from_dimension(n: u8) -> Option<Self> {
        match n {
            4 => Some(Self::FourByFour),
            8 => Some(Self::EightByEight),
            _ => None,
        }
    }

    /// Returns true if `index` is a valid 1-based port number
    pub fn contains(&self, index: u8) -> bool {
        (1..=self.dimension()).contains(&index)
    }

    /// Human-readable name (`4x4` / `8x8`)
    pub fn name(&self) -> &'static str {
        match self {
            Self::FourByFour => "4x4",
            Self::EightByEight => "8x8",
        }
    }
}

impl fmt::Display for MatrixSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatrixSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "4x4" => Ok(Self::FourByFour),
            "8x8" => Ok(Self::EightByEight),
            _ => s
                .parse()
                .ok()
                .and_then(Self::from_dimension)
                .ok_or_else(|| ParseError::InvalidSize(s.to_string())),
        }
    }
}

/// Non-blank trimmed lines of a device reply
///
/// The firmware ends lines with `\r\n`, `\n` or a bare `\r` depending on the
/// command, so all three are accepted.
pub(crate) fn reply_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// Trait for protocol codecs that can parse incoming data streams
pub trait ProtocolCodec {
    /// The command type produced by this codec
    type Command;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete command from the buffer
    fn next_command(&mut self) -> Option<Self::Command>;

    /// Try to extract the next complete command along with its raw bytes
    fn next_command_with_bytes(&mut self) -> Option<(Self::Command, Vec<u8>)>;

    /// Clear the internal buffer
    fn clear(&mut self);
}

/// Trait for commands that can be encoded to bytes
pub trait EncodeCommand {
    /// Encode this command to its wire format
    fn encode(&self) -> Vec<u8>;
}

#[cfg(test)]
mod tests {
    use super::MatrixSize;

    #[test]
    fn test_size_parse_and_display() {
        assert_eq!("4x4".parse::<MatrixSize>().unwrap(), MatrixSize::FourByFour);
        assert_eq!("8x8".parse::<MatrixSize>().unwrap(), MatrixSize::EightByEight);
        assert_eq!("8".parse::<MatrixSize>().unwrap(), MatrixSize::EightByEight);
        assert_eq!(" 4 ".parse::<MatrixSize>().unwrap(), MatrixSize::FourByFour);
        assert!("6x6".parse::<MatrixSize>().is_err());
        assert!("6".parse::<MatrixSize>().is_err());
        assert!("".parse::<MatrixSize>().is_err());
        assert_eq!(MatrixSize::EightByEight.to_string(), "8x8");
    }

    #[test]
    fn test_size_contains() {
        let size = MatrixSize::FourByFour;
        assert!(!size.contains(0));
        assert!(size.contains(1));
        assert!(size.contains(4));
        assert!(!size.contains(5));
        assert_eq!(MatrixSize::from_dimension(8), Some(MatrixSize::EightByEight));
        assert_eq!(MatrixSize::from_dimension(5), None);
    }
}
