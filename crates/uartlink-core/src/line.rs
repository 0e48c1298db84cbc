//! UART line parameters and modem control lines

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Default baud rate when the caller does not specify one
pub const DEFAULT_BAUD_RATE: u32 = 9600;
/// Default number of data bits
pub const DEFAULT_DATA_BITS: u8 = 8;

/// XON flow-control character
pub const XON: u8 = 0x11;
/// XOFF flow-control character
pub const XOFF: u8 = 0x13;

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl FromStr for StopBits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "one" => Ok(StopBits::One),
            "1.5" | "onepointfive" => Ok(StopBits::OnePointFive),
            "2" | "two" => Ok(StopBits::Two),
            _ => Err(Error::InvalidArgument(format!("unknown stop bits '{}'", s))),
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopBits::One => write!(f, "1"),
            StopBits::OnePointFive => write!(f, "1.5"),
            StopBits::Two => write!(f, "2"),
        }
    }
}

/// Parity mode
///
/// The discriminants match the encoding used on the wire by the
/// CDC-style line coding block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Parity {
    #[default]
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "n" | "none" => Ok(Parity::None),
            "o" | "odd" => Ok(Parity::Odd),
            "e" | "even" => Ok(Parity::Even),
            "m" | "mark" => Ok(Parity::Mark),
            "s" | "space" => Ok(Parity::Space),
            _ => Err(Error::InvalidArgument(format!("unknown parity '{}'", s))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        write!(f, "{}", c)
    }
}

/// Flow-control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    None,
    RtsCts,
    DtrDsr,
    XonXoff,
    /// XON/XOFF handled by the chip itself
    XonXoffInline,
}

impl FromStr for FlowControl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FlowControl::None),
            "rtscts" | "rts/cts" => Ok(FlowControl::RtsCts),
            "dtrdsr" | "dtr/dsr" => Ok(FlowControl::DtrDsr),
            "xonxoff" | "xon/xoff" => Ok(FlowControl::XonXoff),
            "xonxoff-inline" => Ok(FlowControl::XonXoffInline),
            _ => Err(Error::InvalidArgument(format!(
                "unknown flow control '{}'",
                s
            ))),
        }
    }
}

bitflags! {
    /// Modem control output lines
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControlLines: u8 {
        /// Data Terminal Ready
        const DTR = 0x01;
        /// Request To Send
        const RTS = 0x02;
    }
}

/// UART line configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl LineConfig {
    /// Create a configuration with the given baud rate and 8N1 framing
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Check the configuration before it is encoded into control transfers
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::InvalidArgument("baud rate must be non-zero".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::InvalidArgument(format!(
                "data bits must be between 5 and 8, got {}",
                self.data_bits
            )));
        }
        Ok(())
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}
