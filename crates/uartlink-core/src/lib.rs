//! uartlink-core - Core types for USB-to-serial bridge drivers
//!
//! This crate defines the contract shared by every chip family and by the
//! layers above them:
//!
//! - [`usb`] - the boundary with the platform USB stack ([`UsbHost`],
//!   [`UsbConnection`])
//! - [`driver`] - the [`SerialDriver`] trait every family implements
//! - [`session`] - open-device state and transfer primitives drivers build on
//! - [`line`] - line configuration, flow control and control lines
//!
//! # Example
//!
//! ```ignore
//! use uartlink_core::{LineConfig, SerialDriver};
//!
//! fn echo<D: SerialDriver>(driver: &mut D) -> uartlink_core::Result<()> {
//!     driver.open(&LineConfig::new(115_200))?;
//!     driver.write(b"ping")?;
//!     if let Some(reply) = driver.read()? {
//!         println!("{:02X?}", reply);
//!     }
//!     driver.close();
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

pub mod driver;
pub mod error;
pub mod line;
pub mod session;
pub mod usb;

pub use driver::{DriverOptions, SerialDriver, Timeouts};
pub use error::{ControlTransferError, Error, Result};
pub use line::{ControlLines, FlowControl, LineConfig, Parity, StopBits};
pub use session::{find_bulk_endpoints, DriverSession, Endpoints};
pub use usb::{
    DeviceDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor, TransferType,
    StandardDescriptor, UsbConnection, UsbHost,
};
