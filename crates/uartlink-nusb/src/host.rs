//! Device enumeration through nusb

use nusb::{DeviceInfo, MaybeFuture};
use uartlink_core::{DeviceDescriptor, StandardDescriptor, UsbConnection, UsbHost};

use crate::connection::NusbConnection;

/// The native USB host
///
/// Desktop platforms have no runtime permission prompt: access is decided
/// by udev rules or group membership, and a refused open surfaces as an
/// open failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NusbHost;

impl NusbHost {
    pub fn new() -> Self {
        Self
    }
}

/// Enumeration id: bus number in the high byte, address in the low byte
pub(crate) fn device_id(busnum: u8, address: u8) -> u32 {
    (u32::from(busnum) << 8) | u32::from(address)
}

fn node_name(busnum: u8, address: u8) -> String {
    format!("/dev/bus/usb/{:03}/{:03}", busnum, address)
}

fn describe(info: &DeviceInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        device_id: device_id(info.busnum(), info.device_address()),
        device_class: info.class(),
        interface_count: info.interfaces().count().min(u8::MAX as usize) as u8,
        // bMaxPacketSize0 is only known once the device is open
        raw: StandardDescriptor {
            usb_version: info.usb_version(),
            class: info.class(),
            subclass: info.subclass(),
            protocol: info.protocol(),
            max_packet_size_0: 0,
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            device_version: info.device_version(),
        }
        .to_bytes(),
        name: node_name(info.busnum(), info.device_address()),
        product_name: info.product_string().map(String::from),
    }
}

fn list() -> Vec<DeviceInfo> {
    match nusb::list_devices().wait() {
        Ok(devices) => devices.collect(),
        Err(e) => {
            log::warn!("USB enumeration failed: {}", e);
            Vec::new()
        }
    }
}

impl UsbHost for NusbHost {
    fn enumerate_devices(&self) -> Vec<DeviceDescriptor> {
        list().iter().map(describe).collect()
    }

    fn has_permission(&self, _device: &DeviceDescriptor) -> bool {
        true
    }

    fn request_permission(&self, device: &DeviceDescriptor) {
        log::debug!("No permission prompt on this platform for {}", device);
    }

    fn open_connection(&self, device: &DeviceDescriptor) -> Option<Box<dyn UsbConnection>> {
        let info = list()
            .into_iter()
            .find(|info| device_id(info.busnum(), info.device_address()) == device.device_id)?;

        log::info!(
            "Opening USB device at bus {} address {}",
            info.busnum(),
            info.device_address()
        );
        match info.open().wait() {
            Ok(handle) => Some(Box::new(NusbConnection::new(handle))),
            Err(e) => {
                log::warn!("Failed to open {}: {}", device, e);
                None
            }
        }
    }
}
