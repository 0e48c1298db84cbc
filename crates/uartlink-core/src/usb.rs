//! Boundary with the platform USB stack
//!
//! The drivers never talk to a concrete USB library. Everything they need
//! from the platform goes through [`UsbHost`] (enumeration, permissions,
//! opening) and [`UsbConnection`] (claiming, bulk and control transfers).
//!
//! Transfers follow the platform convention: a negative return value is a
//! failure code, anything else is the number of bytes transferred.

use std::fmt;
use std::time::Duration;

/// Result code for a transfer that ran into its timeout
pub const TRANSFER_TIMEOUT: i32 = -7;
/// Result code for a generic I/O failure
pub const TRANSFER_IO_ERROR: i32 = -1;
/// Result code for a device that went away
pub const TRANSFER_NO_DEVICE: i32 = -4;
/// Result code for a stalled endpoint
pub const TRANSFER_STALL: i32 = -9;

/// Endpoint direction bit in an endpoint address
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// USB device class code for communication devices (CDC)
pub const USB_CLASS_COMM: u8 = 0x02;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "IN"),
            Direction::Out => write!(f, "OUT"),
        }
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint as reported by the interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    pub fn direction(&self) -> Direction {
        if self.address & ENDPOINT_DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Interface as reported by the active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Length of a standard device descriptor
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

/// Fields of a standard device descriptor that drivers inspect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StandardDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
}

impl StandardDescriptor {
    /// Encode as the 18-byte wire layout, with one configuration
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = vec![0u8; DEVICE_DESCRIPTOR_LEN];
        raw[0] = DEVICE_DESCRIPTOR_LEN as u8;
        raw[1] = 0x01;
        raw[2..4].copy_from_slice(&self.usb_version.to_le_bytes());
        raw[4] = self.class;
        raw[5] = self.subclass;
        raw[6] = self.protocol;
        raw[7] = self.max_packet_size_0;
        raw[8..10].copy_from_slice(&self.vendor_id.to_le_bytes());
        raw[10..12].copy_from_slice(&self.product_id.to_le_bytes());
        raw[12..14].copy_from_slice(&self.device_version.to_le_bytes());
        raw[17] = 1;
        raw
    }
}

/// Snapshot of an enumerated USB device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Unique id for this enumeration, disambiguates identical devices
    pub device_id: u32,
    pub device_class: u8,
    pub interface_count: u8,
    /// Raw standard device descriptor (18 bytes when complete)
    pub raw: Vec<u8>,
    /// Platform name of the device node
    pub name: String,
    /// Product string, when the device reports one
    pub product_name: Option<String>,
}

impl DeviceDescriptor {
    /// Human-readable name used for presentation only
    pub fn display_name(&self) -> String {
        format!(
            "{} ({})",
            self.name,
            self.product_name.as_deref().unwrap_or("Unknown")
        )
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VID:{:04x} PID:{:04x} id {}",
            self.vendor_id, self.product_id, self.device_id
        )
    }
}

/// Platform USB enumeration and access
pub trait UsbHost: Send + Sync {
    /// Currently attached devices
    fn enumerate_devices(&self) -> Vec<DeviceDescriptor>;

    /// Whether the application may open the device
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Ask the platform for access to the device
    ///
    /// The answer arrives asynchronously; callers check
    /// [`has_permission`](Self::has_permission) again later.
    fn request_permission(&self, device: &DeviceDescriptor);

    /// Open a connection, or `None` if the platform refuses
    fn open_connection(&self, device: &DeviceDescriptor) -> Option<Box<dyn UsbConnection>>;
}

/// An open connection to one USB device
pub trait UsbConnection: Send {
    /// Interfaces of the active configuration
    fn interfaces(&self) -> Vec<InterfaceDescriptor>;

    /// Raw device descriptor bytes, if the platform exposes them
    fn raw_descriptors(&self) -> Option<Vec<u8>>;

    /// Claim an interface; `force` detaches a kernel driver first
    fn claim_interface(&mut self, interface: u8, force: bool) -> bool;

    /// Bulk transfer on `endpoint`; direction comes from the address
    ///
    /// For IN endpoints, up to `buf.len()` bytes are received into `buf`.
    fn bulk_transfer(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> i32;

    /// Control transfer; direction comes from bit 7 of `request_type`
    ///
    /// For IN requests, `buf.len()` bytes are requested. For OUT requests,
    /// `buf` is the data stage (possibly empty).
    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> i32;

    /// Release the connection
    fn close(&mut self);
}
