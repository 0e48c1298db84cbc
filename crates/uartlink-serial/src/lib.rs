//! Device registry and serial service for uartlink
//!
//! This is the crate applications talk to. It knows which chip families
//! are compiled in, turns device selectors into drivers, and exposes one
//! open device at a time through [`SerialService`]:
//!
//! ```text
//!   SerialService ── DeviceRegistry ── pl2303 / cp210x drivers
//!        │                                   │
//!        └── ModbusMaster + Poller ── Link ──┘
//! ```
//!
//! ```ignore
//! let mut service = SerialService::new(host);
//! service.open(&"cp210x".parse()?, &LineConfig::new(19_200)).await?;
//! let registers = service.modbus_read_holding_registers(1, 0, 4).await?;
//! ```

#![warn(rust_2018_idioms)]

mod error;
pub mod registry;
mod selector;
mod service;

pub use error::{Error, Result};
pub use registry::{
    available_drivers, has_supported_driver, supported_devices, DeviceRegistry, DriverEntry,
    SupportedDevice,
};
pub use selector::DeviceSelector;
pub use service::SerialService;
