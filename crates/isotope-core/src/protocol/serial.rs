//! Serial devices an Isotope board can show up on
//!
//! The board enumerates as a USB CDC device (`ttyACM*` on Linux, `COM*` on
//! Windows). Discovery only ranks candidates; whether a port really is an
//! Isotope board is decided by the handshake.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::time::Duration;

use super::{IsotopeError, Result};

/// A serial device found on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path or name, usable as a connection address
    pub name: String,
    /// USB vendor/product pair, when the device is on USB
    pub usb_id: Option<(u16, u16)>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            usb_id: None,
            product: None,
            serial_number: None,
        }
    }

    /// Whether this looks like a board rather than a UART or a modem
    pub fn is_likely_board(&self) -> bool {
        self.usb_id.is_some() || device_rank(&self.name).0 == 0
    }
}

/// ACM devices first, then USB serial adapters, each by number; the rest by name
fn device_rank(name: &str) -> (u8, u32) {
    let device = name.rsplit('/').next().unwrap_or(name);
    let numbered = |prefix: &str| {
        device
            .strip_prefix(prefix)
            .and_then(|n| n.parse::<u32>().ok())
    };
    if let Some(n) = numbered("ttyACM").or_else(|| numbered("cu.usbmodem")) {
        (0, n)
    } else if let Some(n) = numbered("ttyUSB") {
        (1, n)
    } else {
        (2, 0)
    }
}

fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by(|a, b| {
        b.is_likely_board()
            .cmp(&a.is_likely_board())
            .then_with(|| device_rank(&a.name).cmp(&device_rank(&b.name)))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Serial devices on this host, likely boards first
pub fn list_ports() -> Vec<PortInfo> {
    let found = match serialport::available_ports() {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!("serial port enumeration failed: {}", e);
            Vec::new()
        }
    };

    let mut ports: Vec<PortInfo> = found
        .into_iter()
        .map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                name: info.port_name,
                usb_id: Some((usb.vid, usb.pid)),
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => PortInfo::named(&info.port_name),
        })
        .collect();

    // Without udev the enumeration misses CDC devices that do exist
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/dev") {
        for name in entries.flatten().filter_map(|e| e.file_name().into_string().ok()) {
            let path = format!("/dev/{}", name);
            if name.starts_with("ttyACM") && !ports.iter().any(|p| p.name == path) {
                ports.push(PortInfo::named(&path));
            }
        }
    }

    sort_ports(&mut ports);
    ports
}

fn serial_error(e: serialport::Error) -> IsotopeError {
    IsotopeError::SerialError(e.to_string())
}

/// Open `name` at 8N1 without flow control, with stale input discarded
pub fn open_port(name: &str, baud_rate: u32, read_timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(name, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(read_timeout)
        .open()
        .map_err(|e| IsotopeError::ConnectionFailed(format!("{}: {}", name, e)))?;

    // DTR low resets some boards into their bootloader
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!("could not assert DTR on {}: {}", name, e);
    }
    port.clear(ClearBuffer::All).map_err(serial_error)?;
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_device_rank() {
        assert_eq!(device_rank("/dev/ttyACM3"), (0, 3));
        assert_eq!(device_rank("/dev/cu.usbmodem14101"), (0, 14101));
        assert_eq!(device_rank("/dev/ttyUSB0"), (1, 0));
        assert_eq!(device_rank("/dev/ttyS0"), (2, 0));
        assert_eq!(device_rank("COM4"), (2, 0));
    }

    #[test]
    fn test_boards_sort_first() {
        let mut ports = vec![
            PortInfo::named("/dev/ttyS0"),
            PortInfo::named("/dev/ttyUSB0"),
            PortInfo::named("/dev/ttyACM10"),
            PortInfo {
                usb_id: Some((0x2341, 0x0043)),
                ..PortInfo::named("COM7")
            },
            PortInfo::named("/dev/ttyACM2"),
        ];
        sort_ports(&mut ports);

        let names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["/dev/ttyACM2", "/dev/ttyACM10", "COM7", "/dev/ttyUSB0", "/dev/ttyS0"]
        );
    }

    #[test]
    fn test_list_ports_does_not_panic() {
        for port in list_ports() {
            println!("{} likely board: {}", port.name, port.is_likely_board());
        }
    }

    #[test]
    fn test_open_missing_port_fails() {
        let result = open_port("/dev/isotope-does-not-exist", 115200, Duration::from_millis(10));
        assert!(matches!(result, Err(IsotopeError::ConnectionFailed(_))));
    }
}
