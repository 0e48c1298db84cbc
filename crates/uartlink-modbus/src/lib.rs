//! Modbus RTU master over uartlink serial drivers
//!
//! The [`ModbusMaster`] turns register reads and writes into framed RTU
//! transactions on a [`Link`], reassembling responses that the bridge
//! delivers in arbitrary chunks. A [`Poller`] repeats one read in the
//! background and broadcasts the results.
//!
//! ```no_run
//! # async fn demo(driver: Box<dyn uartlink_core::SerialDriver>) -> uartlink_modbus::Result<()> {
//! use uartlink_modbus::{Link, ModbusMaster};
//!
//! let master = ModbusMaster::new(Link::new(driver));
//! let registers = master.read_holding_registers(1, 0, 2).await?;
//! println!("{:?}", registers);
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]

pub mod crc;
pub mod error;
pub mod frame;
pub mod link;
pub mod master;
pub mod poll;

pub use crc::crc16;
pub use error::{Error, ErrorKind, ExceptionCode, Result};
pub use frame::Request;
pub use link::{Link, Transaction};
pub use master::{MasterConfig, ModbusMaster};
pub use poll::{PollConfig, PollUpdate, Poller};
