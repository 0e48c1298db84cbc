//! Error types for Modbus transactions

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::frame::Request;

/// Result type for Modbus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Exception code returned by a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    Unknown(u8),
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::SlaveDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailed,
            other => ExceptionCode::Unknown(other),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> u8 {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::SlaveDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::SlaveDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailed => 0x0B,
            ExceptionCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionCode::IllegalFunction => "illegal function",
            ExceptionCode::IllegalDataAddress => "illegal data address",
            ExceptionCode::IllegalDataValue => "illegal data value",
            ExceptionCode::SlaveDeviceFailure => "slave device failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::SlaveDeviceBusy => "slave device busy",
            ExceptionCode::MemoryParityError => "memory parity error",
            ExceptionCode::GatewayPathUnavailable => "gateway path unavailable",
            ExceptionCode::GatewayTargetFailed => "gateway target failed to respond",
            ExceptionCode::Unknown(_) => "unknown exception",
        };
        write!(f, "{} (0x{:02X})", name, u8::from(*self))
    }
}

/// What went wrong in a transaction
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// The driver failed to move bytes
    #[error("transport error: {0}")]
    Transport(#[from] uartlink_core::Error),

    /// The response did not complete within the transaction timeout
    #[error("no complete response within {} ms ({received} bytes received)", .timeout.as_millis())]
    ResponseTimeout { timeout: Duration, received: usize },

    /// The response is shorter than its own header declares
    #[error("incomplete response: expected {expected} bytes, got {received}")]
    IncompleteResponse { expected: usize, received: usize },

    #[error("CRC mismatch: calculated 0x{calculated:04X}, received 0x{received:04X}")]
    CrcMismatch { calculated: u16, received: u16 },

    /// The slave answered with an exception frame
    #[error("slave exception for function 0x{function:02X}: {code}")]
    SlaveException { function: u8, code: ExceptionCode },

    #[error("unexpected slave id {received} (expected {expected})")]
    UnexpectedSlaveId { expected: u8, received: u8 },

    #[error("unexpected function code 0x{received:02X} (expected 0x{expected:02X})")]
    UnexpectedFunctionCode { expected: u8, received: u8 },

    /// Rejected before any I/O
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// A failed transaction together with the request that caused it
#[derive(Debug, Error)]
#[error("{request}: {kind}")]
pub struct Error {
    pub request: Request,
    #[source]
    pub kind: ErrorKind,
}

impl Error {
    pub fn new(request: Request, kind: ErrorKind) -> Self {
        Self { request, kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Whether the slave itself rejected the request
    pub fn is_exception(&self) -> bool {
        matches!(self.kind, ErrorKind::SlaveException { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_code_round_trip_for_unknown() {
        assert_eq!(ExceptionCode::from(0x02), ExceptionCode::IllegalDataAddress);
        assert_eq!(ExceptionCode::from(0x42), ExceptionCode::Unknown(0x42));
        assert_eq!(u8::from(ExceptionCode::Unknown(0x42)), 0x42);
    }

    #[test]
    fn test_message_includes_request_context() {
        let err = Error::new(
            Request::WriteSingleRegister {
                slave: 1,
                address: 10,
                value: 5,
            },
            ErrorKind::SlaveException {
                function: 0x06,
                code: ExceptionCode::IllegalDataAddress,
            },
        );
        assert_eq!(
            err.to_string(),
            "write single register (slave 1, address 10, value 5): slave exception for function 0x06: illegal data address (0x02)"
        );
        assert!(err.is_exception());
    }
}
