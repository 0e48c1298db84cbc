//! uartlink-dummy - In-memory USB host and serial port emulators
//!
//! This crate provides two emulators that are useful for testing and
//! development without real hardware:
//!
//! - [`DummyHost`] implements the platform USB boundary. It records every
//!   control transfer and serves scripted bulk data, so chip drivers can be
//!   checked against their exact control sequences.
//! - [`DummyPort`] implements [`SerialDriver`](uartlink_core::SerialDriver)
//!   directly. Behind it sits either a small Modbus RTU slave or a queue of
//!   scripted replies.

mod host;
mod port;
mod slave;

pub use host::{
    raw_device_descriptor, ControlRecord, DeviceState, DummyConnection, DummyDevice, DummyHost,
};
pub use port::{DummyConfig, DummyPort, DummyPortHandle, PortState};
pub use slave::{crc16, ModbusSlave};
