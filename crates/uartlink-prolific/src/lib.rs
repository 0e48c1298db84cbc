//! uartlink-prolific - Prolific PL2303 USB-serial bridge support
//!
//! The PL2303 family spans several silicon generations that differ in their
//! vendor request codes and initialization. The generation is detected at
//! open time from the device descriptor (and, for some USB 2.0 parts, a
//! status probe); see [`DeviceType`].
//!
//! # Protocol Overview
//!
//! Data flows over fixed bulk endpoints (0x83 IN, 0x02 OUT). Line coding and
//! modem control use CDC-style class requests, while buffer purges, flow
//! control and the undocumented initialization sequence use vendor
//! requests.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use uartlink_core::{DriverOptions, LineConfig, SerialDriver};
//! use uartlink_prolific::ProlificDriver;
//!
//! let mut driver = ProlificDriver::new(host, descriptor, DriverOptions::default());
//! driver.open(&LineConfig::new(9600))?;
//! driver.write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B])?;
//! ```

mod device;
mod protocol;

pub use device::ProlificDriver;
pub use protocol::{
    encode_line_coding, DeviceType, PROLIFIC_PRODUCT_IDS, PROLIFIC_VENDOR_ID,
};
