//! Error types for the USB-serial transport layer

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::usb::Direction;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Context of a control transfer that did not return the expected length
///
/// This is the primary diagnostic payload between a chip driver and its
/// caller: it carries everything needed to replay the failing request on
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTransferError {
    /// What the driver was trying to do
    pub message: String,
    /// Raw result returned by the host (negative = failure)
    pub result: i32,
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// Expected transfer length
    pub length: usize,
    /// Timeout used for the transfer
    pub timeout: Duration,
}

impl fmt::Display for ControlTransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: result {} (request_type 0x{:02X}, request 0x{:02X}, value 0x{:04X}, index 0x{:04X}, length {}, timeout {} ms)",
            self.message,
            self.result,
            self.request_type,
            self.request,
            self.value,
            self.index,
            self.length,
            self.timeout.as_millis()
        )
    }
}

/// Errors that can occur when talking to a USB-serial bridge
#[derive(Debug, Error)]
pub enum Error {
    /// No driver exists for the device, or the device is not enumerated
    #[error("Device not supported: {0}")]
    DeviceNotSupported(String),

    /// The host could not open a connection to the device
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    /// The host refused access to the device
    #[error("Permission denied for device {0}")]
    PermissionDenied(String),

    /// The communication interface could not be claimed
    #[error("Could not claim interface {interface}")]
    InterfaceClaimFailed { interface: u8 },

    /// The interface does not expose the endpoints the driver needs
    #[error("Required endpoints not found on interface {interface}")]
    EndpointsNotFound { interface: u8 },

    /// Device descriptors are missing or malformed
    #[error("Invalid device descriptor: {0}")]
    InvalidDescriptor(String),

    /// Bulk transfer returned a negative result
    #[error(
        "Bulk {direction} transfer failed on endpoint 0x{endpoint:02X}: result {code} (length {length}, timeout {} ms)",
        .timeout.as_millis()
    )]
    BulkTransferFailed {
        direction: Direction,
        code: i32,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    },

    /// Control transfer returned an unexpected length
    #[error("Control transfer failed: {0}")]
    ControlTransferFailed(Box<ControlTransferError>),

    /// Parameter rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O attempted on a driver that is not open
    #[error("Device is not open")]
    NotOpen,

    /// The worker running a blocking transfer went away
    #[error("Transfer aborted: {0}")]
    Aborted(String),
}

impl From<ControlTransferError> for Error {
    fn from(e: ControlTransferError) -> Self {
        Error::ControlTransferFailed(Box::new(e))
    }
}
