//! Matrix command set
//!
//! The B-100/300 accepts short ASCII lines terminated by `\r`. Output and
//! input numbers are zero-padded to two digits.
//!
//! # Common Commands
//! - `OOII` - route output `OO` to input `II` (`II` = `00` switches the output off)
//! - `OO+` / `OO-` - step the input on output `OO`
//! - `OOL` - output on (restores the last routed input)
//! - `01` / `00` - system power on / off
//! - `FASET` - factory reset
//! - `VR` / `IP` - firmware and IP address queries
//! - `STMAP` - status dump

use crate::error::ParseError;
use crate::{EncodeCommand, ProtocolCodec, DEFAULT_STATUS_COMMAND, TERMINATOR};

/// Maximum command length (reasonable limit to prevent buffer overflow)
const MAX_COMMAND_LEN: usize = 64;

/// Direction for the input step commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StepDirection {
    /// `+`: next input
    Next,
    /// `-`: previous input
    Previous,
}

impl StepDirection {
    fn symbol(&self) -> char {
        match self {
            Self::Next => '+',
            Self::Previous => '-',
        }
    }
}

/// A single matrix command
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatrixCommand {
    /// Route an output to an input: `0103`
    Route { output: u8, input: u8 },
    /// Step the input on an output: `01+` / `01-`
    Step { output: u8, direction: StepDirection },
    /// Switch an output on: `01L`
    OutputOn { output: u8 },
    /// Switch an output off: `0100`
    OutputOff { output: u8 },
    /// Whole-system power: `01` / `00`
    SystemPower { on: bool },
    /// Factory reset: `FASET`
    FactoryReset,
    /// Firmware version query: `VR`
    QueryFirmware,
    /// IP address query: `IP`
    QueryIp,
    /// Status dump (command text is configurable, usually `STMAP`)
    Status(String),
    /// Anything else, sent or received verbatim
    Raw(String),
}

impl MatrixCommand {
    /// Status dump using the default `STMAP` command
    pub fn default_status() -> Self {
        Self::Status(DEFAULT_STATUS_COMMAND.to_string())
    }

    /// Returns true if the device answers this command with text
    pub fn expects_reply(&self) -> bool {
        matches!(self, Self::Status(_) | Self::QueryFirmware | Self::QueryIp)
    }

    /// Parse a single command line (terminator already stripped)
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::InvalidCommand(line.into()));
        }

        match line {
            "FASET" => return Ok(Self::FactoryReset),
            "VR" => return Ok(Self::QueryFirmware),
            "IP" => return Ok(Self::QueryIp),
            "00" => return Ok(Self::SystemPower { on: false }),
            "01" => return Ok(Self::SystemPower { on: true }),
            DEFAULT_STATUS_COMMAND => return Ok(Self::default_status()),
            _ => {}
        }

        let bytes = line.as_bytes();
        let output = match bytes.get(..2).and_then(two_digits) {
            Some(output) => output,
            None => return Ok(Self::Raw(line.to_string())),
        };

        match &bytes[2..] {
            b"+" => Ok(Self::Step {
                output,
                direction: StepDirection::Next,
            }),
            b"-" => Ok(Self::Step {
                output,
                direction: StepDirection::Previous,
            }),
            b"L" => Ok(Self::OutputOn { output }),
            rest if rest.len() == 2 => match two_digits(rest) {
                Some(0) => Ok(Self::OutputOff { output }),
                Some(input) => Ok(Self::Route { output, input }),
                None => Ok(Self::Raw(line.to_string())),
            },
            _ => Ok(Self::Raw(line.to_string())),
        }
    }
}

/// Decode exactly two ASCII digits
fn two_digits(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => Some((a - b'0') * 10 + (b - b'0')),
        _ => None,
    }
}

impl EncodeCommand for MatrixCommand {
    fn encode(&self) -> Vec<u8> {
        let cmd = match self {
            Self::Route { output, input } => format!("{:02}{:02}", output, input),
            Self::Step { output, direction } => format!("{:02}{}", output, direction.symbol()),
            Self::OutputOn { output } => format!("{:02}L", output),
            Self::OutputOff { output } => format!("{:02}00", output),
            Self::SystemPower { on } => (if *on { "01" } else { "00" }).to_string(),
            Self::FactoryReset => "FASET".to_string(),
            Self::QueryFirmware => "VR".to_string(),
            Self::QueryIp => "IP".to_string(),
            Self::Status(s) | Self::Raw(s) => s.clone(),
        };
        let mut bytes = cmd.into_bytes();
        bytes.push(TERMINATOR);
        bytes
    }
}

/// Streaming command decoder (host -> device direction)
pub struct CommandCodec {
    buffer: Vec<u8>,
}

impl CommandCodec {
    /// Create a new command codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_COMMAND_LEN),
        }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for CommandCodec {
    type Command = MatrixCommand;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow
        if self.buffer.len() > MAX_COMMAND_LEN * 4 {
            let start = self.buffer.len() - MAX_COMMAND_LEN;
            self.buffer = self.buffer[start..].to_vec();
        }
    }

    fn next_command(&mut self) -> Option<Self::Command> {
        self.next_command_with_bytes().map(|(cmd, _)| cmd)
    }

    fn next_command_with_bytes(&mut self) -> Option<(Self::Command, Vec<u8>)> {
        loop {
            let term_pos = self.buffer.iter().position(|&b| b == TERMINATOR)?;
            let cmd_bytes: Vec<u8> = self.buffer.drain(..=term_pos).collect();
            let cmd_str = String::from_utf8_lossy(&cmd_bytes[..cmd_bytes.len() - 1]);

            // Blank frames (a lone `\r`, or `\n\r` from a terminal) carry nothing
            if cmd_str.trim().is_empty() {
                continue;
            }

            let cmd = match MatrixCommand::parse(&cmd_str) {
                Ok(cmd) => cmd,
                Err(e) => {
                    tracing::warn!("Failed to parse matrix command: {}", e);
                    MatrixCommand::Raw(cmd_str.trim().to_string())
                }
            };

            return Some((cmd, cmd_bytes));
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandCodec, MatrixCommand, StepDirection};
    use crate::{EncodeCommand, ProtocolCodec};

    #[test]
    fn test_encode_command_table() {
        assert_eq!(MatrixCommand::Route { output: 1, input: 3 }.encode(), b"0103\r");
        assert_eq!(
            MatrixCommand::Step {
                output: 2,
                direction: StepDirection::Next
            }
            .encode(),
            b"02+\r"
        );
        assert_eq!(
            MatrixCommand::Step {
                output: 8,
                direction: StepDirection::Previous
            }
            .encode(),
            b"08-\r"
        );
        assert_eq!(MatrixCommand::OutputOn { output: 4 }.encode(), b"04L\r");
        assert_eq!(MatrixCommand::OutputOff { output: 4 }.encode(), b"0400\r");
        assert_eq!(MatrixCommand::SystemPower { on: true }.encode(), b"01\r");
        assert_eq!(MatrixCommand::SystemPower { on: false }.encode(), b"00\r");
        assert_eq!(MatrixCommand::FactoryReset.encode(), b"FASET\r");
        assert_eq!(MatrixCommand::QueryFirmware.encode(), b"VR\r");
        assert_eq!(MatrixCommand::QueryIp.encode(), b"IP\r");
        assert_eq!(MatrixCommand::default_status().encode(), b"STMAP\r");
    }

    #[test]
    fn test_parse_route_and_off() {
        assert_eq!(
            MatrixCommand::parse("0203").unwrap(),
            MatrixCommand::Route { output: 2, input: 3 }
        );
        assert_eq!(
            MatrixCommand::parse("0200").unwrap(),
            MatrixCommand::OutputOff { output: 2 }
        );
    }

    #[test]
    fn test_parse_system_power_is_not_a_route() {
        assert_eq!(
            MatrixCommand::parse("01").unwrap(),
            MatrixCommand::SystemPower { on: true }
        );
        assert_eq!(
            MatrixCommand::parse("00").unwrap(),
            MatrixCommand::SystemPower { on: false }
        );
    }

    #[test]
    fn test_parse_unknown_is_raw() {
        assert_eq!(
            MatrixCommand::parse("HELLO").unwrap(),
            MatrixCommand::Raw("HELLO".into())
        );
        assert_eq!(
            MatrixCommand::parse("0X03").unwrap(),
            MatrixCommand::Raw("0X03".into())
        );
        assert!(MatrixCommand::parse("   ").is_err());
    }

    #[test]
    fn test_expects_reply() {
        assert!(MatrixCommand::default_status().expects_reply());
        assert!(MatrixCommand::QueryFirmware.expects_reply());
        assert!(!MatrixCommand::FactoryReset.expects_reply());
        assert!(!MatrixCommand::Route { output: 1, input: 1 }.expects_reply());
    }

    #[test]
    fn test_streaming_parse() {
        let mut codec = CommandCodec::new();

        codec.push_bytes(b"01");
        assert!(codec.next_command().is_none());

        codec.push_bytes(b"02\r");
        assert_eq!(
            codec.next_command(),
            Some(MatrixCommand::Route { output: 1, input: 2 })
        );
    }

    #[test]
    fn test_multiple_commands_and_blank_frames() {
        let mut codec = CommandCodec::new();
        codec.push_bytes(b"03L\r\r\nVR\rSTMAP\r");

        assert_eq!(codec.next_command(), Some(MatrixCommand::OutputOn { output: 3 }));
        assert_eq!(codec.next_command(), Some(MatrixCommand::QueryFirmware));
        let (cmd, raw) = codec.next_command_with_bytes().unwrap();
        assert_eq!(cmd, MatrixCommand::default_status());
        assert_eq!(raw, b"STMAP\r");
        assert!(codec.next_command().is_none());
    }
}
