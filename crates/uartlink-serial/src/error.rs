//! Error types for the serial service

use thiserror::Error;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Driver or USB failure
    #[error(transparent)]
    Transport(#[from] uartlink_core::Error),

    /// Modbus transaction failure
    #[error(transparent)]
    Modbus(#[from] uartlink_modbus::Error),

    /// No device is open
    #[error("No device is open")]
    NotOpen,

    /// The device selector could not be parsed or resolved
    #[error("Invalid device selector: {0}")]
    InvalidSelector(String),
}
