//! Cached matrix state

use matrix_protocol::{parse_status, MatrixSize, StatusEntry};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Identity strings derived once from the port path and matrix size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable identifier, e.g. `_dev_ttyUSB0_4x4`
    pub unique_id: String,
    /// Manufacturer name
    pub manufacturer: String,
    /// Model name including the size
    pub model: String,
    /// Display name
    pub display_name: String,
}

impl DeviceIdentity {
    /// Build the identity for a matrix on `port`
    pub fn new(port: &str, size: MatrixSize) -> Self {
        let n = size.dimension();
        let port_id: String = port
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        Self {
            unique_id: format!("{port_id}_{n}x{n}"),
            manufacturer: "Binary".to_string(),
            model: format!("B-100/300 {n}x{n}"),
            display_name: "Binary HDMI Matrix (RS232)".to_string(),
        }
    }

    /// Web interface URL for a known IP address
    pub fn configuration_url(ip_address: &str) -> String {
        format!("http://{ip_address}")
    }
}

/// Point-in-time copy of the cache for consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSnapshot {
    /// Selected input per output (index 0 is output 1)
    pub routes: Vec<u8>,
    /// Power state per output
    pub power: Vec<bool>,
    /// Firmware banner, if known
    pub firmware: Option<String>,
    /// Device IP address, if known
    pub ip_address: Option<String>,
}

/// Last known routing and power state of every output
///
/// Routes survive power-off: turning an output off only clears its power
/// flag, so the input it showed last is still known when it comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixState {
    size: MatrixSize,
    routes: Vec<u8>,
    power: Vec<bool>,
    firmware: Option<String>,
    ip_address: Option<String>,
}

impl MatrixState {
    /// Every output on and showing input 1
    pub fn new(size: MatrixSize) -> Self {
        let n = usize::from(size.dimension());
        Self {
            size,
            routes: vec![1; n],
            power: vec![true; n],
            firmware: None,
            ip_address: None,
        }
    }

    /// Matrix size
    pub fn size(&self) -> MatrixSize {
        self.size
    }

    /// Selected input per output
    pub fn routes(&self) -> &[u8] {
        &self.routes
    }

    /// Power state per output
    pub fn power(&self) -> &[bool] {
        &self.power
    }

    /// Input selected on `output`, or None if out of range
    pub fn route(&self, output: u8) -> Option<u8> {
        self.slot(output).map(|i| self.routes[i])
    }

    /// Power state of `output`, or None if out of range
    pub fn is_powered(&self, output: u8) -> Option<bool> {
        self.slot(output).map(|i| self.power[i])
    }

    /// Firmware banner
    pub fn firmware(&self) -> Option<&str> {
        self.firmware.as_deref()
    }

    /// Device IP address
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// Record a route; this also means the output is on
    ///
    /// Returns false (and changes nothing) if either index is out of range.
    pub fn set_route(&mut self, output: u8, input: u8) -> bool {
        match self.slot(output) {
            Some(i) if self.size.contains(input) => {
                self.routes[i] = input;
                self.power[i] = true;
                true
            }
            _ => false,
        }
    }

    /// Mark an output on, falling back to input 1 if no route is known
    pub fn power_on(&mut self, output: u8) -> bool {
        let Some(i) = self.slot(output) else {
            return false;
        };
        self.power[i] = true;
        if self.routes[i] < 1 {
            self.routes[i] = 1;
        }
        true
    }

    /// Mark an output off, keeping its route
    pub fn power_off(&mut self, output: u8) -> bool {
        let Some(i) = self.slot(output) else {
            return false;
        };
        self.power[i] = false;
        true
    }

    /// Apply one parsed status entry
    ///
    /// Input 0 means the output is off. Entries naming an output or input
    /// outside the matrix are ignored.
    pub fn apply_entry(&mut self, entry: StatusEntry) -> bool {
        if entry.is_powered_off() {
            self.power_off(entry.output)
        } else {
            self.set_route(entry.output, entry.input)
        }
    }

    /// Apply a whole status dump; returns how many entries were used
    pub fn apply_status(&mut self, text: &str) -> usize {
        parse_status(text)
            .into_iter()
            .filter(|entry| {
                let applied = self.apply_entry(*entry);
                if !applied {
                    trace!("Ignoring out-of-range status entry {:?}", entry);
                }
                applied
            })
            .count()
    }

    /// Replace the firmware banner
    pub fn set_firmware(&mut self, firmware: Option<String>) {
        self.firmware = firmware;
    }

    /// Replace the IP address
    pub fn set_ip_address(&mut self, ip_address: Option<String>) {
        self.ip_address = ip_address;
    }

    /// Copy the cache out
    pub fn snapshot(&self) -> MatrixSnapshot {
        MatrixSnapshot {
            routes: self.routes.clone(),
            power: self.power.clone(),
            firmware: self.firmware.clone(),
            ip_address: self.ip_address.clone(),
        }
    }

    fn slot(&self, output: u8) -> Option<usize> {
        self.size
            .contains(output)
            .then(|| usize::from(output) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_initial_state() {
        let state = MatrixState::new(MatrixSize::EightByEight);
        assert_eq!(state.routes(), &[1; 8]);
        assert_eq!(state.power(), &[true; 8]);
        assert_eq!(state.firmware(), None);
        assert_eq!(state.ip_address(), None);
    }

    #[test]
    fn test_status_line_sets_route_and_power() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        state.power_off(1);

        assert_eq!(state.apply_status("o01i03"), 1);
        assert_eq!(state.route(1), Some(3));
        assert_eq!(state.is_powered(1), Some(true));
    }

    #[test]
    fn test_status_input_zero_powers_off_and_keeps_route() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        state.set_route(2, 4);

        assert_eq!(state.apply_status("o02i00"), 1);
        assert_eq!(state.is_powered(2), Some(false));
        assert_eq!(state.route(2), Some(4));
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        let before = state.clone();

        assert_eq!(state.apply_status("o0Xi03"), 0);
        assert_eq!(state, before);

        assert_eq!(state.apply_status("o0Xi03\r\no02i04\r\n"), 1);
        assert_eq!(state.route(2), Some(4));
        assert_eq!(state.route(1), Some(1));
    }

    #[test]
    fn test_blank_padded_status_line_is_applied() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        assert_eq!(state.apply_status("o 2i03"), 1);
        assert_eq!(state.route(2), Some(3));
    }

    #[test]
    fn test_out_of_range_entries_are_ignored() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        let before = state.clone();

        // output 5 and input 7 do not exist on a 4x4
        assert_eq!(state.apply_status("o05i01\no01i07\no00i00\n"), 0);
        assert_eq!(state, before);
    }

    #[test]
    fn test_power_cycle_keeps_route() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        state.set_route(3, 2);
        state.power_off(3);
        assert_eq!(state.is_powered(3), Some(false));

        state.power_on(3);
        assert_eq!(state.is_powered(3), Some(true));
        assert_eq!(state.route(3), Some(2));
    }

    #[test]
    fn test_power_on_defaults_unknown_route() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        state.routes[0] = 0;
        state.power[0] = false;

        state.power_on(1);
        assert_eq!(state.route(1), Some(1));
        assert_eq!(state.is_powered(1), Some(true));
    }

    #[test]
    fn test_identity() {
        let identity = DeviceIdentity::new("/dev/serial/by-id/usb-FTDI:01", MatrixSize::EightByEight);
        assert_eq!(identity.unique_id, "_dev_serial_by-id_usb-FTDI_01_8x8");
        assert_eq!(identity.manufacturer, "Binary");
        assert_eq!(identity.model, "B-100/300 8x8");
        assert_eq!(identity.display_name, "Binary HDMI Matrix (RS232)");
        assert_eq!(
            DeviceIdentity::configuration_url("192.168.1.50"),
            "http://192.168.1.50"
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut state = MatrixState::new(MatrixSize::FourByFour);
        state.set_firmware(Some("FW:V1.04".into()));
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["routes"], serde_json::json!([1, 1, 1, 1]));
        assert_eq!(json["firmware"], "FW:V1.04");
        assert!(json["ip_address"].is_null());
    }

    proptest! {
        #[test]
        fn prop_set_route_in_range(output in 1u8..=8, input in 1u8..=8) {
            let mut state = MatrixState::new(MatrixSize::EightByEight);
            state.power_off(output);
            prop_assert!(state.set_route(output, input));
            prop_assert_eq!(state.route(output), Some(input));
            prop_assert_eq!(state.is_powered(output), Some(true));
        }

        #[test]
        fn prop_out_of_range_changes_nothing(output in prop_oneof![Just(0u8), 5u8..=u8::MAX], input in any::<u8>()) {
            let mut state = MatrixState::new(MatrixSize::FourByFour);
            let before = state.clone();
            prop_assert!(!state.set_route(output, input));
            prop_assert!(!state.power_on(output));
            prop_assert!(!state.power_off(output));
            prop_assert_eq!(state, before);
        }
    }
}
