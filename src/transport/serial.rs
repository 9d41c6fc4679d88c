//! Serial port backend (USB CDC on the panel side)

use async_trait::async_trait;
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType};
use tracing::debug;

use super::discovery::{BoxedConnection, Connector, DeviceDescriptor};
use super::TransportError;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Connector over the OS serial ports
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Enumerate serial ports (blocking)
    pub fn list_ports() -> Result<Vec<DeviceDescriptor>, TransportError> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        Ok(ports.into_iter().map(descriptor_from_info).collect())
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

fn descriptor_from_info(info: SerialPortInfo) -> DeviceDescriptor {
    match info.port_type {
        SerialPortType::UsbPort(usb) => DeviceDescriptor {
            port_name: info.port_name,
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            manufacturer: usb.manufacturer,
            product: usb.product,
            serial_number: usb.serial_number,
        },
        _ => DeviceDescriptor::new(info.port_name),
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        tokio::task::spawn_blocking(Self::list_ports)
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<BoxedConnection, TransportError> {
        debug!("Opening {} at {} baud", device.port_name, self.baud_rate);
        let stream = tokio_serial::new(&device.port_name, self.baud_rate)
            .open_native_async()
            .map_err(|source| TransportError::Open {
                port: device.port_name.clone(),
                source,
            })?;
        Ok(Box::new(stream))
    }
}
