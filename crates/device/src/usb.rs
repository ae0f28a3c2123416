//! USB bulk sink for the surface display.
//!
//! Opens the device by vendor/product ID, claims the display interface and
//! selects its alternate setting. Frames are pushed through
//! [`surface_protocol::TransportPump`]; this type only moves bytes.

use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};
use surface_protocol::{BulkSink, DeviceKind, DeviceProfile, TransportError};

use crate::error::DeviceError;

/// Claimed display interface of one surface.
pub struct UsbDisplay {
    handle: DeviceHandle<Context>,
    interface: u8,
}

impl UsbDisplay {
    /// Open the first device matching `profile`'s USB identity.
    pub fn open(profile: &DeviceProfile) -> Result<Self, DeviceError> {
        let usb = &profile.usb;
        let context = Context::new()?;

        let device = context
            .devices()?
            .iter()
            .find(|d| {
                d.device_descriptor().map_or(false, |desc| {
                    desc.vendor_id() == usb.vendor_id && desc.product_id() == usb.product_id
                })
            })
            .ok_or_else(|| DeviceError::DeviceNotFound(profile.name.to_string()))?;

        let mut handle = device.open()?;
        handle.claim_interface(usb.interface)?;
        if let Err(e) = handle.set_alternate_setting(usb.interface, usb.alt_setting) {
            let _ = handle.release_interface(usb.interface);
            return Err(e.into());
        }

        tracing::info!(
            device = profile.name,
            bus = device.bus_number(),
            address = device.address(),
            "display interface claimed"
        );

        Ok(Self {
            handle,
            interface: usb.interface,
        })
    }
}

impl BulkSink for UsbDisplay {
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(|e| map_usb_error(e, timeout))
    }
}

impl Drop for UsbDisplay {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

/// Translate a libusb failure into the transport's error kinds.
pub fn map_usb_error(error: rusb::Error, timeout: Duration) -> TransportError {
    match error {
        rusb::Error::Timeout => TransportError::TransferTimeout(timeout),
        rusb::Error::NoDevice => TransportError::Disconnected,
        rusb::Error::NotFound => TransportError::DeviceNotFound(error.to_string()),
        other => TransportError::Io(other.to_string()),
    }
}

/// Kinds of every supported surface currently on the bus.
pub fn detect() -> Result<Vec<DeviceKind>, DeviceError> {
    let context = Context::new()?;
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if let Some(kind) = kind_for(desc.vendor_id(), desc.product_id()) {
            found.push(kind);
        }
    }
    Ok(found)
}

fn kind_for(vendor_id: u16, product_id: u16) -> Option<DeviceKind> {
    DeviceKind::ALL.into_iter().find(|kind| {
        let usb = &kind.profile().usb;
        usb.vendor_id == vendor_id && usb.product_id == product_id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let timeout = Duration::from_millis(250);
        assert_eq!(
            map_usb_error(rusb::Error::Timeout, timeout),
            TransportError::TransferTimeout(timeout)
        );
        assert_eq!(map_usb_error(rusb::Error::NoDevice, timeout), TransportError::Disconnected);
        assert!(matches!(
            map_usb_error(rusb::Error::Pipe, timeout),
            TransportError::Io(_)
        ));
    }

    #[test]
    fn test_kind_for_ids() {
        assert_eq!(kind_for(0x2982, 0x1967), Some(DeviceKind::Push2));
        assert_eq!(kind_for(0x2982, 0x1969), Some(DeviceKind::Push3));
        assert_eq!(kind_for(0x2982, 0x1968), None);
        assert_eq!(kind_for(0x1234, 0x1967), None);
    }
}
