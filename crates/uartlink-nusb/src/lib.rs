//! USB host backed by nusb
//!
//! Implements the [`uartlink_core::UsbHost`] boundary on top of the native
//! nusb stack. Transfers block with the timeout the driver asks for and
//! report results with the negative-code convention of
//! [`uartlink_core::usb`].

#![warn(rust_2018_idioms)]

mod connection;
mod host;

pub use connection::NusbConnection;
pub use host::NusbHost;
