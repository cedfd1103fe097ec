//! Serial port handling
//!
//! Port discovery and the serialport-backed opener used outside of tests.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::stream::{Link, PortOpener, SerialLink};
use super::BridgeError;
use crate::config::BridgeConfig;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// CH340 (1a86:7523) is the USB bridge fitted to BMCU boards
    pub fn is_ch340(&self) -> bool {
        self.vid == Some(0x1a86) && self.pid == Some(0x7523)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
                serial_number: usb_info.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key: ttyACM* first, then ttyUSB* (numeric suffix order), then the rest by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// Candidate feeder ports. CH340 adapters come first, the rest follow the
/// ttyACM/ttyUSB ordering. Linux also picks up `/dev` nodes that enumeration missed.
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for port in ports.into_iter().map(PortInfo::from) {
                found.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => tracing::debug!("BMCU: port enumeration failed: {e}"),
    }

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{fname}");
                    found
                        .entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    ports.sort_by_key(|p| (!p.is_ch340(), port_sort_key(&p.name)));
    ports
}

/// Open a serial port 8N1, no flow control, with the configured per-call timeout
pub fn open_port(config: &BridgeConfig) -> Result<Box<dyn SerialPort>, BridgeError> {
    serialport::new(&config.serial, config.baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(config.read_timeout().max(Duration::from_millis(1)))
        .open()
        .map_err(|e| BridgeError::ConnectionFailed(format!("{}: {e}", config.serial)))
}

/// Opener backed by the serialport crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&self, config: &BridgeConfig) -> Result<Box<dyn Link>, BridgeError> {
        Ok(Box::new(SerialLink::new(open_port(config)?)))
    }
}
