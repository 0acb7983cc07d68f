//! Serial port listing

use std::collections::HashSet;
use std::path::Path;

use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

/// Stable symlinks to USB serial adapters on Linux
const BY_ID_DIR: &str = "/dev/serial/by-id";

/// Ports matching these are never offered
const SKIP_PATTERNS: &[&str] = &["Bluetooth", "debug"];

/// A port the matrix might be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    /// Port path (e.g. /dev/ttyUSB0, COM3)
    pub port: String,
    /// USB product string, if known
    pub product: Option<String>,
}

impl PortEntry {
    /// Label for listings: "port (product)" or just the port
    pub fn display_label(&self) -> String {
        match &self.product {
            Some(product) => format!("{} ({})", self.port, product),
            None => self.port.clone(),
        }
    }
}

/// List candidate ports, best guesses first
pub fn list_ports() -> Vec<PortEntry> {
    let mut entries = by_id_links(Path::new(BY_ID_DIR));

    match available_ports() {
        Ok(ports) => entries.extend(ports.into_iter().map(|p| PortEntry {
            product: match p.port_type {
                SerialPortType::UsbPort(usb) => usb.product,
                _ => None,
            },
            port: p.port_name,
        })),
        Err(e) => debug!("Port enumeration failed: {}", e),
    }

    let ports = order_ports(entries);
    info!("Found {} serial port(s)", ports.len());
    ports
}

/// Sort by kind (by-id links, ttyUSB, ttyACM, the rest), then by name
///
/// Duplicates keep the entry that knows its product.
pub fn order_ports(mut entries: Vec<PortEntry>) -> Vec<PortEntry> {
    entries.retain(|e| !SKIP_PATTERNS.iter().any(|p| e.port.contains(p)));
    entries.sort_by(|a, b| {
        (rank(&a.port), &a.port, a.product.is_none())
            .cmp(&(rank(&b.port), &b.port, b.product.is_none()))
    });

    let mut seen = HashSet::new();
    entries.retain(|e| seen.insert(e.port.clone()));
    entries
}

fn rank(port: &str) -> u8 {
    if port.starts_with(BY_ID_DIR) {
        0
    } else if port.starts_with("/dev/ttyUSB") {
        1
    } else if port.starts_with("/dev/ttyACM") {
        2
    } else {
        3
    }
}

fn by_id_links(dir: &Path) -> Vec<PortEntry> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    read_dir
        .filter_map(Result::ok)
        .map(|entry| PortEntry {
            port: entry.path().to_string_lossy().into_owned(),
            product: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(port: &str) -> PortEntry {
        PortEntry {
            port: port.to_string(),
            product: None,
        }
    }

    #[test]
    fn test_order_and_dedup() {
        let ports = order_ports(vec![
            entry("/dev/ttyS0"),
            entry("/dev/ttyACM0"),
            entry("/dev/ttyUSB1"),
            entry("/dev/serial/by-id/usb-FTDI_FT232R-if00"),
            entry("/dev/ttyUSB0"),
            entry("/dev/ttyUSB0"),
            entry("/dev/cu.Bluetooth-Incoming-Port"),
        ]);

        let names: Vec<&str> = ports.iter().map(|p| p.port.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "/dev/serial/by-id/usb-FTDI_FT232R-if00",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyACM0",
                "/dev/ttyS0",
            ]
        );
    }

    #[test]
    fn test_display_label() {
        let port = PortEntry {
            port: "/dev/ttyUSB0".into(),
            product: Some("FT232R USB UART".into()),
        };
        assert_eq!(port.display_label(), "/dev/ttyUSB0 (FT232R USB UART)");
        assert_eq!(entry("COM3").display_label(), "COM3");
    }

    #[test]
    fn test_missing_by_id_dir_is_empty() {
        assert!(by_id_links(Path::new("/nonexistent/serial/by-id")).is_empty());
    }
}
