//! Virtual matrix device model
//!
//! Mirrors the behaviour of the real switcher closely enough for the
//! controller: routing memory survives output power-off, step commands wrap,
//! and the status dump reports `i00` for outputs that are off.

use matrix_protocol::{
    format_status_report, MatrixCommand, MatrixSize, StatusEntry, StepDirection,
    DEFAULT_STATUS_COMMAND,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A command frame as received by the virtual device
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// Decoded command
    pub command: MatrixCommand,
    /// Raw bytes including the terminator
    pub raw: Vec<u8>,
    /// When the frame was complete
    pub at: Instant,
}

/// Configuration for creating a virtual matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMatrixConfig {
    /// Matrix size
    pub size: MatrixSize,
    /// Banner returned by `VR`
    pub firmware: String,
    /// Address returned by `IP` (None = device has no network module)
    pub ip_address: Option<String>,
    /// Command the device answers with a status dump
    pub status_command: String,
}

impl Default for VirtualMatrixConfig {
    fn default() -> Self {
        Self {
            size: MatrixSize::FourByFour,
            firmware: "FW:V1.04".to_string(),
            ip_address: Some("192.168.1.50".to_string()),
            status_command: DEFAULT_STATUS_COMMAND.to_string(),
        }
    }
}

/// A simulated HDMI matrix
#[derive(Debug)]
pub struct VirtualMatrix {
    size: MatrixSize,
    routes: Vec<u8>,
    power: Vec<bool>,
    system_on: bool,
    firmware: String,
    ip_address: Option<String>,
    status_command: String,
    /// Canned status reply used instead of the computed one
    status_override: Option<String>,
    received: Vec<ReceivedFrame>,
    unplugged: bool,
}

impl VirtualMatrix {
    /// Create a new virtual matrix with default settings
    pub fn new(size: MatrixSize) -> Self {
        Self::from_config(VirtualMatrixConfig {
            size,
            ..Default::default()
        })
    }

    /// Create a virtual matrix from configuration
    pub fn from_config(config: VirtualMatrixConfig) -> Self {
        let n = config.size.dimension() as usize;
        Self {
            size: config.size,
            routes: vec![1; n],
            power: vec![true; n],
            system_on: true,
            firmware: config.firmware,
            ip_address: config.ip_address,
            status_command: config.status_command.trim().to_string(),
            status_override: None,
            received: Vec::new(),
            unplugged: false,
        }
    }

    /// Matrix size
    pub fn size(&self) -> MatrixSize {
        self.size
    }

    /// Input currently routed to `output` (1-based)
    pub fn route(&self, output: u8) -> Option<u8> {
        self.index(output).map(|i| self.routes[i])
    }

    /// Power state of `output` (1-based)
    pub fn is_powered(&self, output: u8) -> Option<bool> {
        self.index(output).map(|i| self.power[i])
    }

    /// Whole-system power state
    pub fn system_on(&self) -> bool {
        self.system_on
    }

    /// Front-panel route change (no command involved)
    pub fn set_route(&mut self, output: u8, input: u8) {
        if let Some(i) = self.index(output) {
            if self.size.contains(input) {
                self.routes[i] = input;
                self.power[i] = true;
            }
        }
    }

    /// Replace the computed status dump with fixed text
    pub fn set_status_override(&mut self, reply: Option<String>) {
        self.status_override = reply;
    }

    /// Simulate the cable being pulled (or plugged back in)
    pub fn set_unplugged(&mut self, unplugged: bool) {
        self.unplugged = unplugged;
    }

    /// Returns true while the cable is pulled
    pub fn is_unplugged(&self) -> bool {
        self.unplugged
    }

    /// Every frame received so far
    pub fn received(&self) -> &[ReceivedFrame] {
        &self.received
    }

    /// Commands received so far, without timing
    pub fn received_commands(&self) -> Vec<MatrixCommand> {
        self.received.iter().map(|f| f.command.clone()).collect()
    }

    /// Forget the receive log
    pub fn clear_received(&mut self) {
        self.received.clear();
    }

    /// Record a received frame
    pub fn record(&mut self, command: MatrixCommand, raw: Vec<u8>) {
        self.received.push(ReceivedFrame {
            command,
            raw,
            at: Instant::now(),
        });
    }

    /// Status entries as the device would report them
    pub fn status_entries(&self) -> Vec<StatusEntry> {
        (0..self.routes.len())
            .map(|i| StatusEntry {
                output: i as u8 + 1,
                input: if self.power[i] && self.system_on {
                    self.routes[i]
                } else {
                    0
                },
            })
            .collect()
    }

    /// Apply a command; returns the reply bytes, if the command has one
    pub fn handle(&mut self, command: &MatrixCommand) -> Option<Vec<u8>> {
        match command {
            MatrixCommand::Route { output, input } => {
                self.set_route(*output, *input);
                None
            }
            MatrixCommand::Step { output, direction } => {
                self.step(*output, *direction);
                None
            }
            MatrixCommand::OutputOn { output } => {
                if let Some(i) = self.index(*output) {
                    self.power[i] = true;
                }
                None
            }
            MatrixCommand::OutputOff { output } => {
                if let Some(i) = self.index(*output) {
                    self.power[i] = false;
                }
                None
            }
            MatrixCommand::SystemPower { on } => {
                self.system_on = *on;
                None
            }
            MatrixCommand::FactoryReset => {
                self.routes.iter_mut().for_each(|r| *r = 1);
                self.power.iter_mut().for_each(|p| *p = true);
                self.system_on = true;
                None
            }
            MatrixCommand::QueryFirmware => Some(format!("{}\r\n", self.firmware).into_bytes()),
            MatrixCommand::QueryIp => {
                let reply = self.ip_address.as_deref().unwrap_or("IP NOT SET");
                Some(format!("{}\r\n", reply).into_bytes())
            }
            MatrixCommand::Status(cmd) | MatrixCommand::Raw(cmd) if *cmd == self.status_command => {
                let report = match &self.status_override {
                    Some(reply) => reply.clone(),
                    None => format_status_report(&self.status_entries()),
                };
                Some(report.into_bytes())
            }
            MatrixCommand::Status(_) | MatrixCommand::Raw(_) => None,
        }
    }

    fn step(&mut self, output: u8, direction: StepDirection) {
        let Some(i) = self.index(output) else {
            return;
        };
        let n = self.size.dimension();
        let current = self.routes[i];
        self.routes[i] = match direction {
            StepDirection::Next => current % n + 1,
            StepDirection::Previous => (current + n - 2) % n + 1,
        };
        self.power[i] = true;
    }

    fn index(&self, output: u8) -> Option<usize> {
        self.size
            .contains(output)
            .then(|| output as usize - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_then_status() {
        let mut matrix = VirtualMatrix::new(MatrixSize::FourByFour);
        matrix.handle(&MatrixCommand::Route { output: 3, input: 2 });

        let reply = matrix.handle(&MatrixCommand::default_status()).unwrap();
        assert_eq!(
            String::from_utf8(reply).unwrap(),
            "o01i01\r\no02i01\r\no03i02\r\no04i01\r\n"
        );
    }

    #[test]
    fn test_output_off_keeps_route() {
        let mut matrix = VirtualMatrix::new(MatrixSize::FourByFour);
        matrix.handle(&MatrixCommand::Route { output: 1, input: 4 });
        matrix.handle(&MatrixCommand::OutputOff { output: 1 });

        assert_eq!(matrix.is_powered(1), Some(false));
        assert_eq!(matrix.route(1), Some(4));
        assert_eq!(matrix.status_entries()[0].input, 0);

        matrix.handle(&MatrixCommand::OutputOn { output: 1 });
        assert_eq!(matrix.status_entries()[0].input, 4);
    }

    #[test]
    fn test_step_wraps() {
        let mut matrix = VirtualMatrix::new(MatrixSize::FourByFour);
        let prev = MatrixCommand::Step {
            output: 1,
            direction: StepDirection::Previous,
        };
        let next = MatrixCommand::Step {
            output: 1,
            direction: StepDirection::Next,
        };

        matrix.handle(&prev);
        assert_eq!(matrix.route(1), Some(4));
        matrix.handle(&next);
        assert_eq!(matrix.route(1), Some(1));
        matrix.handle(&next);
        assert_eq!(matrix.route(1), Some(2));
    }

    #[test]
    fn test_identity_replies() {
        let mut matrix = VirtualMatrix::new(MatrixSize::EightByEight);
        assert_eq!(
            matrix.handle(&MatrixCommand::QueryFirmware).unwrap(),
            b"FW:V1.04\r\n"
        );
        assert_eq!(
            matrix.handle(&MatrixCommand::QueryIp).unwrap(),
            b"192.168.1.50\r\n"
        );
    }

    #[test]
    fn test_unknown_commands_are_silent() {
        let mut matrix = VirtualMatrix::new(MatrixSize::FourByFour);
        assert!(matrix.handle(&MatrixCommand::Raw("HELLO".into())).is_none());
        assert!(matrix
            .handle(&MatrixCommand::Route { output: 9, input: 1 })
            .is_none());
        assert_eq!(matrix.route(1), Some(1));
    }

    #[test]
    fn test_factory_reset() {
        let mut matrix = VirtualMatrix::new(MatrixSize::FourByFour);
        matrix.handle(&MatrixCommand::Route { output: 2, input: 3 });
        matrix.handle(&MatrixCommand::OutputOff { output: 4 });
        matrix.handle(&MatrixCommand::FactoryReset);

        assert_eq!(matrix.route(2), Some(1));
        assert_eq!(matrix.is_powered(4), Some(true));
    }
}
