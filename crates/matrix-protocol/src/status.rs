//! Status dump parsing
//!
//! The status dump (usually `STMAP`) is answered with one line per output:
//!
//! ```text
//! o01i02
//! o02i00
//! o03i03
//! ```
//!
//! Output digits sit at offsets 1-2 of the line; input digits follow the
//! first `i`. Input `00` means the output is powered off. Any text around
//! the two fields is tolerated as long as it does not shift them.

use tracing::trace;

use crate::error::ParseError;
use crate::reply_lines;

/// One decoded `o<NN>i<NN>` status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusEntry {
    /// Output number as reported (not range-checked)
    pub output: u8,
    /// Input number as reported; 0 means powered off
    pub input: u8,
}

impl StatusEntry {
    /// Returns true if the device reports this output as off
    pub fn is_powered_off(&self) -> bool {
        self.input == 0
    }
}

/// Parse a single status line
///
/// The first `i` anywhere in the line anchors the input field, so a stray
/// `i` in leading text would misalign it. The device never emits one.
pub fn parse_status_line(line: &str) -> Result<StatusEntry, ParseError> {
    let line = line.trim();
    let i_pos = match line.find('i') {
        Some(pos) if line.starts_with('o') => pos,
        _ => return Err(ParseError::NotAStatusLine(line.to_string())),
    };

    let output = parse_field(line, 1, "output")?;
    let input = parse_field(line, i_pos + 1, "input")?;

    Ok(StatusEntry { output, input })
}

/// Decode the (up to) two characters starting at `start`
///
/// Blanks around the digits are tolerated, so `" 2"` reads as 2.
fn parse_field(line: &str, start: usize, field: &'static str) -> Result<u8, ParseError> {
    let bytes = line.as_bytes();
    let end = (start + 2).min(bytes.len());
    let digits = trim_blanks(bytes.get(start..end).unwrap_or_default());

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidField {
            field,
            text: String::from_utf8_lossy(digits).into_owned(),
        });
    }

    Ok(digits.iter().fold(0u8, |acc, d| acc * 10 + (d - b'0')))
}

fn trim_blanks(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

/// Parse every recognisable line of a status dump
///
/// Lines that do not parse are skipped; a partially garbled reply still
/// yields every entry that survived.
pub fn parse_status(text: &str) -> Vec<StatusEntry> {
    reply_lines(text)
        .filter_map(|line| match parse_status_line(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!("Skipping status line: {}", e);
                None
            }
        })
        .collect()
}

/// Render entries the way the device prints them
pub fn format_status_report(entries: &[StatusEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("o{:02}i{:02}\r\n", e.output, e.input))
        .collect()
}
