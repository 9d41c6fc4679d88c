//! Device discovery and connection seams
//!
//! The transport never talks to a port API directly. It asks a [`Connector`]
//! for the currently visible devices, filters them with a [`DeviceMatcher`],
//! and opens the first match as a boxed duplex byte stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use super::TransportError;

/// What discovery knows about a candidate device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// OS port name (e.g. `COM3`, `/dev/ttyACM0`)
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port_name)?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " [{:04X}:{:04X}]", vid, pid)?;
        }
        if let Some(product) = &self.product {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}

/// Predicate selecting the peer device
pub type DeviceMatcher = Arc<dyn Fn(&DeviceDescriptor) -> bool + Send + Sync>;

/// Declarative matcher built from configuration
///
/// Every field that is set must match; an empty filter matches any device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    /// Case-insensitive substring of the USB product string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
}

impl DeviceFilter {
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        if let Some(port) = &self.port {
            if !device.port_name.eq_ignore_ascii_case(port) {
                return false;
            }
        }
        if self.vid.is_some() && self.vid != device.vid {
            return false;
        }
        if self.pid.is_some() && self.pid != device.pid {
            return false;
        }
        if let Some(pattern) = &self.product {
            let pattern = pattern.to_lowercase();
            let found = device
                .product
                .as_deref()
                .map(|p| p.to_lowercase().contains(&pattern))
                .unwrap_or(false);
            if !found {
                return false;
            }
        }
        true
    }

    pub fn into_matcher(self) -> DeviceMatcher {
        Arc::new(move |device| self.matches(device))
    }
}

/// Duplex byte stream to an open device
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedConnection = Box<dyn Connection>;

/// Backend able to enumerate and open devices
#[async_trait]
pub trait Connector: Send + Sync {
    /// List the devices currently visible
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Open a duplex connection to `device`
    async fn open(&self, device: &DeviceDescriptor) -> Result<BoxedConnection, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pico() -> DeviceDescriptor {
        DeviceDescriptor::new("/dev/ttyACM0")
            .with_usb_ids(0x2E8A, 0x000A)
            .with_product("Pico Combo Panel")
    }

    #[test]
    fn test_empty_filter_matches_anything() {
        assert!(DeviceFilter::default().matches(&pico()));
        assert!(DeviceFilter::default().matches(&DeviceDescriptor::new("COM1")));
    }

    #[test]
    fn test_filter_by_usb_ids() {
        let filter = DeviceFilter {
            vid: Some(0x2E8A),
            pid: Some(0x000A),
            ..Default::default()
        };
        assert!(filter.matches(&pico()));
        assert!(!filter.matches(&DeviceDescriptor::new("/dev/ttyACM0")));
        assert!(!filter.matches(&pico().with_usb_ids(0x2E8A, 0x0005)));
    }

    #[test]
    fn test_filter_by_port_and_product() {
        let filter = DeviceFilter {
            port: Some("/dev/ttyACM0".into()),
            product: Some("combo".into()),
            ..Default::default()
        };
        assert!(filter.matches(&pico()));
        assert!(!filter.matches(&DeviceDescriptor::new("/dev/ttyACM1").with_product("Combo")));
        assert!(!filter.matches(&DeviceDescriptor::new("/dev/ttyACM0")));
    }

    #[test]
    fn test_port_match_ignores_case() {
        let filter = DeviceFilter {
            port: Some("com3".into()),
            ..Default::default()
        };
        assert!(filter.matches(&DeviceDescriptor::new("COM3")));
    }

    #[test]
    fn test_into_matcher() {
        let matcher = DeviceFilter {
            vid: Some(0x2E8A),
            ..Default::default()
        }
        .into_matcher();
        assert!(matcher(&pico()));
        assert!(!matcher(&DeviceDescriptor::new("COM9")));
    }

    #[test]
    fn test_descriptor_display() {
        assert_eq!(
            pico().to_string(),
            "/dev/ttyACM0 [2E8A:000A] Pico Combo Panel"
        );
        assert_eq!(DeviceDescriptor::new("COM4").to_string(), "COM4");
    }
}
