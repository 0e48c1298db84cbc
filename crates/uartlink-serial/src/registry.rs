//! Driver registration and construction
//!
//! Every chip family enabled at compile time contributes one entry to a
//! static table: its vendor id, the product ids it handles and a
//! constructor. A device is supported only if its product id is listed
//! under its own vendor.

use std::sync::Arc;

use uartlink_core::{DeviceDescriptor, DriverOptions, Error, Result, SerialDriver, UsbHost};

/// Builds a driver for an enumerated device
pub type DriverConstructor =
    fn(Arc<dyn UsbHost>, DeviceDescriptor, DriverOptions) -> Box<dyn SerialDriver>;

/// One chip family
pub struct DriverEntry {
    /// Family name, also accepted as a device selector
    pub name: &'static str,
    pub description: &'static str,
    pub vendor_id: u16,
    /// Product ids and part names
    pub products: &'static [(u16, &'static str)],
    pub create: DriverConstructor,
}

impl DriverEntry {
    pub fn supports(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.products.iter().any(|&(pid, _)| pid == product_id)
    }
}

#[cfg(feature = "pl2303")]
fn create_pl2303(
    host: Arc<dyn UsbHost>,
    descriptor: DeviceDescriptor,
    options: DriverOptions,
) -> Box<dyn SerialDriver> {
    Box::new(uartlink_prolific::ProlificDriver::new(
        host, descriptor, options,
    ))
}

#[cfg(feature = "cp210x")]
fn create_cp210x(
    host: Arc<dyn UsbHost>,
    descriptor: DeviceDescriptor,
    options: DriverOptions,
) -> Box<dyn SerialDriver> {
    Box::new(uartlink_cp210x::Cp210xDriver::new(host, descriptor, options))
}

static DRIVERS: &[DriverEntry] = &[
    #[cfg(feature = "pl2303")]
    DriverEntry {
        name: "pl2303",
        description: "Prolific PL2303 family",
        vendor_id: uartlink_prolific::PROLIFIC_VENDOR_ID,
        products: uartlink_prolific::PROLIFIC_PRODUCT_IDS,
        create: create_pl2303,
    },
    #[cfg(feature = "cp210x")]
    DriverEntry {
        name: "cp210x",
        description: "Silicon Labs CP210x family",
        vendor_id: uartlink_cp210x::SILABS_VENDOR_ID,
        products: uartlink_cp210x::CP210X_PRODUCT_IDS,
        create: create_cp210x,
    },
];

/// All chip families compiled in
pub fn available_drivers() -> &'static [DriverEntry] {
    DRIVERS
}

/// Look up a family by selector name
pub fn find_family(name: &str) -> Option<&'static DriverEntry> {
    DRIVERS.iter().find(|entry| entry.name == name)
}

fn find_entry(vendor_id: u16, product_id: u16) -> Option<&'static DriverEntry> {
    DRIVERS
        .iter()
        .find(|entry| entry.supports(vendor_id, product_id))
}

/// Whether some compiled-in family handles this id pair
pub fn has_supported_driver(vendor_id: u16, product_id: u16) -> bool {
    find_entry(vendor_id, product_id).is_some()
}

/// One row of the supported-device table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedDevice {
    pub family: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    pub part: &'static str,
}

/// Every supported id pair, in table order
pub fn supported_devices() -> Vec<SupportedDevice> {
    DRIVERS
        .iter()
        .flat_map(|entry| {
            entry.products.iter().map(move |&(product_id, part)| SupportedDevice {
                family: entry.name,
                vendor_id: entry.vendor_id,
                product_id,
                part,
            })
        })
        .collect()
}

/// Creates drivers for devices attached to one USB host
#[derive(Clone)]
pub struct DeviceRegistry {
    host: Arc<dyn UsbHost>,
    options: DriverOptions,
}

impl DeviceRegistry {
    pub fn new(host: Arc<dyn UsbHost>) -> Self {
        Self::with_options(host, DriverOptions::default())
    }

    /// Registry whose drivers open with `options`
    pub fn with_options(host: Arc<dyn UsbHost>, options: DriverOptions) -> Self {
        Self { host, options }
    }

    pub fn host(&self) -> &Arc<dyn UsbHost> {
        &self.host
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Attached devices that some family supports
    pub fn supported_attached(&self) -> Vec<DeviceDescriptor> {
        self.host
            .enumerate_devices()
            .into_iter()
            .filter(|d| has_supported_driver(d.vendor_id, d.product_id))
            .collect()
    }

    /// Presentation names of the supported attached devices
    ///
    /// Devices the application may not open yet get a permission request;
    /// the platform answers asynchronously.
    pub fn list_available_devices(&self) -> Vec<String> {
        self.supported_attached()
            .into_iter()
            .map(|device| {
                if !self.host.has_permission(&device) {
                    log::info!("Requesting permission for {}", device);
                    self.host.request_permission(&device);
                }
                device.display_name()
            })
            .collect()
    }

    fn build(&self, device: DeviceDescriptor) -> Result<Box<dyn SerialDriver>> {
        let entry = find_entry(device.vendor_id, device.product_id)
            .ok_or_else(|| Error::DeviceNotSupported(device.to_string()))?;
        log::debug!("Using {} driver for {}", entry.name, device);
        Ok((entry.create)(self.host.clone(), device, self.options))
    }

    /// Driver for the first attached device with this id pair
    pub fn create_driver(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn SerialDriver>> {
        if !has_supported_driver(vendor_id, product_id) {
            return Err(Error::DeviceNotSupported(format!(
                "VID:{:04x} PID:{:04x}",
                vendor_id, product_id
            )));
        }
        let device = self
            .host
            .enumerate_devices()
            .into_iter()
            .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
            .ok_or_else(|| {
                Error::DeviceNotSupported(format!(
                    "VID:{:04x} PID:{:04x} is not attached",
                    vendor_id, product_id
                ))
            })?;
        self.build(device)
    }

    /// Driver for the attached device with this enumeration id
    pub fn create_driver_by_id(&self, device_id: u32) -> Result<Box<dyn SerialDriver>> {
        let device = self
            .host
            .enumerate_devices()
            .into_iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| {
                Error::DeviceNotSupported(format!("no attached device with id {}", device_id))
            })?;
        self.build(device)
    }

    /// Driver for the `index`-th attached device of a family
    pub fn create_driver_for_family(
        &self,
        family: &str,
        index: usize,
    ) -> Result<Box<dyn SerialDriver>> {
        let entry = find_family(family)
            .ok_or_else(|| Error::DeviceNotSupported(format!("unknown family '{}'", family)))?;
        let device = self
            .host
            .enumerate_devices()
            .into_iter()
            .filter(|d| entry.supports(d.vendor_id, d.product_id))
            .nth(index)
            .ok_or_else(|| {
                Error::DeviceNotSupported(format!("no {} device at index {}", family, index))
            })?;
        self.build(device)
    }
}
