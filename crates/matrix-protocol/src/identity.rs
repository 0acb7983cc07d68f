//! Identity query replies (`VR` and `IP`)

use crate::reply_lines;

/// Extract the firmware banner from a `VR` reply
///
/// Returns the first line containing `FW:`.
pub fn parse_firmware_reply(text: &str) -> Option<String> {
    reply_lines(text)
        .find(|line| line.contains("FW:"))
        .map(str::to_string)
}

/// Extract the IP address from an `IP` reply
///
/// Only the first non-empty line is considered, and only if it starts with a
/// digit. Anything else (an echo, an error banner) means "no address".
pub fn parse_ip_reply(text: &str) -> Option<String> {
    let first = reply_lines(text).next()?;
    first
        .starts_with(|c: char| c.is_ascii_digit())
        .then(|| first.to_string())
}
