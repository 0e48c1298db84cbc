//! uartlink-cp210x - Silicon Labs CP210x USB-serial bridge support
//!
//! The CP210x is configured entirely through vendor requests addressed to
//! the interface (bmRequestType 0x41): enable the UART, set modem handshake
//! lines, program the baud rate and the line control word. Data moves over
//! the first bulk IN/OUT endpoint pair of the claimed interface.
//!
//! Hardware flow control is not exposed; only [`FlowControl::None`] is
//! accepted.
//!
//! [`FlowControl::None`]: uartlink_core::FlowControl::None

mod device;
mod protocol;

pub use device::Cp210xDriver;
pub use protocol::{encode_line_control, CP210X_PRODUCT_IDS, SILABS_VENDOR_ID};
