//! Serial device enumeration, used for port selection and link liveness.

use serde::Serialize;

use super::TransportError;

/// A serial device known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// OS device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub name: String,
    /// Manufacturer/product text when the OS reports it.
    pub description: String,
    /// True for USB serial adapters, the usual way an EGM-4 is attached.
    pub is_usb: bool,
}

/// Answers whether a device is currently enumerated by the host.
///
/// Implementations may block on the OS; the ingestion controller calls them through
/// `spawn_blocking`.
pub trait PortEnumerator: Send + Sync {
    /// True when `port` is present.
    fn is_present(&self, port: &str) -> bool;
}

/// Enumerates real serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn is_present(&self, port: &str) -> bool {
        match list_ports() {
            Ok(ports) => ports.iter().any(|p| p.name == port),
            Err(e) => {
                tracing::warn!(port, error = %e, "could not enumerate serial ports");
                false
            }
        }
    }
}

/// Enumerator for links that cannot disappear, such as the simulator.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysPresent;

impl PortEnumerator for AlwaysPresent {
    fn is_present(&self, _port: &str) -> bool {
        true
    }
}

/// List serial devices, USB adapters first.
#[cfg(feature = "instrument_serial")]
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Enumeration(e.to_string()))?;

    let infos = ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = [usb.manufacturer, usb.product]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                PortInfo {
                    name: p.port_name,
                    description,
                    is_usb: true,
                }
            }
            SerialPortType::BluetoothPort => PortInfo {
                name: p.port_name,
                description: "Bluetooth".to_string(),
                is_usb: false,
            },
            SerialPortType::PciPort | SerialPortType::Unknown => PortInfo {
                name: p.port_name,
                description: String::new(),
                is_usb: false,
            },
        })
        .collect();

    Ok(sort_ports(infos))
}

/// List serial devices, USB adapters first.
#[cfg(not(feature = "instrument_serial"))]
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    Err(TransportError::FeatureDisabled)
}

#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
fn sort_ports(mut ports: Vec<PortInfo>) -> Vec<PortInfo> {
    ports.sort_by(|a, b| b.is_usb.cmp(&a.is_usb).then_with(|| a.name.cmp(&b.name)));
    ports
}
