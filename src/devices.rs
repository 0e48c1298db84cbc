//! USB host selection and service construction

use std::sync::Arc;

use uartlink_core::UsbHost;
use uartlink_modbus::MasterConfig;
use uartlink_serial::{available_drivers, DeviceRegistry, SerialService};

/// The platform USB host
#[cfg(feature = "nusb")]
pub fn usb_host() -> Arc<dyn UsbHost> {
    Arc::new(uartlink_nusb::NusbHost::new())
}

/// Without a USB backend only the dummy device can be opened
#[cfg(not(feature = "nusb"))]
pub fn usb_host() -> Arc<dyn UsbHost> {
    log::debug!("Built without USB support; no hardware devices will be found");
    Arc::new(uartlink_dummy::DummyHost::new())
}

/// Build a service on the platform host
pub fn service(master_config: MasterConfig) -> SerialService {
    SerialService::with_registry(DeviceRegistry::new(usb_host()), master_config)
}

/// Short list of selector family names for CLI help
pub fn family_names() -> String {
    let mut names: Vec<&str> = available_drivers().iter().map(|d| d.name).collect();
    names.push("dummy");
    names.join(", ")
}
