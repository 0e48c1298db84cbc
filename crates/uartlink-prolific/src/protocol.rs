//! PL2303 protocol constants and helpers
//!
//! Request codes and the generation detection rules. The initialization
//! sequence ("black magic") is vendor-defined and undocumented; it is
//! reproduced as-is.

use uartlink_core::usb::USB_CLASS_COMM;
use uartlink_core::{Error, FlowControl, LineConfig, Result, StopBits};

// USB device identifiers
/// Prolific Technology vendor ID
pub const PROLIFIC_VENDOR_ID: u16 = 0x067B;

/// Known PL2303 product IDs
pub const PROLIFIC_PRODUCT_IDS: &[(u16, &str)] = &[
    (0x2303, "PL2303"),
    (0x23A3, "PL2303GC"),
    (0x23B3, "PL2303GB"),
    (0x23C3, "PL2303GT"),
    (0x23D3, "PL2303GL"),
    (0x23E3, "PL2303GE"),
    (0x23F3, "PL2303GS"),
];

// Fixed endpoints
/// Bulk IN endpoint
pub const READ_EP: u8 = 0x83;
/// Bulk OUT endpoint
pub const WRITE_EP: u8 = 0x02;
/// Interrupt IN endpoint (modem status, unused)
pub const INTERRUPT_EP: u8 = 0x81;

// Request types
pub const VENDOR_IN_REQTYPE: u8 = 0xC0;
pub const VENDOR_OUT_REQTYPE: u8 = 0x40;
/// Class request, host to device, recipient interface
pub const CTRL_OUT_REQTYPE: u8 = 0x21;

// Vendor requests
pub const VENDOR_READ_REQUEST: u8 = 0x01;
pub const VENDOR_WRITE_REQUEST: u8 = 0x01;
pub const VENDOR_READ_HXN_REQUEST: u8 = 0x80;
pub const VENDOR_WRITE_HXN_REQUEST: u8 = 0x80;

// Class requests
pub const SET_LINE_REQUEST: u8 = 0x20;
pub const SET_CONTROL_REQUEST: u8 = 0x22;

// Buffer purge (vendor write values)
pub const RESET_HXN_REQUEST: u16 = 0x07;
pub const FLUSH_RX_REQUEST: u16 = 0x08;
pub const FLUSH_TX_REQUEST: u16 = 0x09;
pub const RESET_HXN_RX_PIPE: u16 = 1;
pub const RESET_HXN_TX_PIPE: u16 = 2;

/// Vendor read value used to probe for a T-series part
pub const HX_STATUS_PROBE_VALUE: u16 = 0x8080;

/// Flow-control vendor write value on HXN parts
const HXN_FLOW_CONTROL_VALUE: u16 = 0x0A;

/// Size of the line coding block
pub const LINE_CODING_LEN: usize = 7;

/// PL2303 silicon generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// Original PL2303 (and CDC-class lookalikes)
    Type01,
    /// PL2303TA / TB
    TypeT,
    /// PL2303HX
    TypeHx,
    /// PL2303G series, which uses a different vendor request set
    TypeHxn,
}

impl DeviceType {
    /// Classify a part from its raw device descriptor
    ///
    /// `probe` runs the HX status read; it is only consulted for USB 2.0
    /// parts with device release 3.00 or 5.00.
    pub fn classify<F>(device_class: u8, raw: &[u8], probe: F) -> Result<Self>
    where
        F: FnOnce() -> bool,
    {
        if raw.len() < 14 {
            return Err(Error::InvalidDescriptor(format!(
                "expected at least 14 descriptor bytes, got {}",
                raw.len()
            )));
        }

        let usb_version = u16::from_le_bytes([raw[2], raw[3]]);
        let device_version = u16::from_le_bytes([raw[12], raw[13]]);
        let max_packet_size = raw[7];

        let device_type = if device_class == USB_CLASS_COMM || max_packet_size != 64 {
            DeviceType::Type01
        } else if usb_version == 0x0200 {
            if (device_version == 0x0300 || device_version == 0x0500) && probe() {
                DeviceType::TypeT
            } else {
                DeviceType::TypeHxn
            }
        } else {
            DeviceType::TypeHx
        };
        Ok(device_type)
    }

    pub fn is_hxn(self) -> bool {
        self == DeviceType::TypeHxn
    }

    /// Vendor read request code for this generation
    pub fn vendor_read_request(self) -> u8 {
        if self.is_hxn() {
            VENDOR_READ_HXN_REQUEST
        } else {
            VENDOR_READ_REQUEST
        }
    }

    /// Vendor write request code for this generation
    pub fn vendor_write_request(self) -> u8 {
        if self.is_hxn() {
            VENDOR_WRITE_HXN_REQUEST
        } else {
            VENDOR_WRITE_REQUEST
        }
    }

    /// Vendor write (value, index) that selects a flow-control mode
    pub fn flow_control_request(self, flow: FlowControl) -> Result<(u16, u16)> {
        let hxn = self.is_hxn();
        match flow {
            FlowControl::None if hxn => Ok((HXN_FLOW_CONTROL_VALUE, 0xFF)),
            FlowControl::None => Ok((0, 0)),
            FlowControl::RtsCts if hxn => Ok((HXN_FLOW_CONTROL_VALUE, 0xFA)),
            FlowControl::RtsCts => Ok((0, 0x61)),
            FlowControl::XonXoffInline if hxn => Ok((HXN_FLOW_CONTROL_VALUE, 0xEE)),
            FlowControl::XonXoffInline => Ok((0, 0xC1)),
            other => Err(Error::InvalidArgument(format!(
                "pl2303 does not support {:?} flow control",
                other
            ))),
        }
    }
}

/// One vendor transfer of the initialization sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicStep {
    /// Vendor read of one byte at (value, index)
    In(u16, u16),
    /// Vendor write without data at (value, index)
    Out(u16, u16),
}

/// Initialization sequence for non-HXN parts
///
/// The final write depends on the generation, see [`black_magic_final`].
pub const BLACK_MAGIC: [MagicStep; 10] = [
    MagicStep::In(0x8484, 0),
    MagicStep::Out(0x0404, 0),
    MagicStep::In(0x8484, 0),
    MagicStep::In(0x8383, 0),
    MagicStep::In(0x8484, 0),
    MagicStep::Out(0x0404, 1),
    MagicStep::In(0x8484, 0),
    MagicStep::In(0x8383, 0),
    MagicStep::Out(0, 1),
    MagicStep::Out(1, 0),
];

/// Last step of the initialization sequence
pub fn black_magic_final(device_type: DeviceType) -> MagicStep {
    let index = if device_type == DeviceType::Type01 {
        0x24
    } else {
        0x44
    };
    MagicStep::Out(2, index)
}

/// Encode the 7-byte line coding block
///
/// Layout: baud rate (u32 LE), stop bits code, parity code, data bits.
pub fn encode_line_coding(config: &LineConfig) -> [u8; LINE_CODING_LEN] {
    let mut block = [0u8; LINE_CODING_LEN];
    block[..4].copy_from_slice(&config.baud_rate.to_le_bytes());
    block[4] = match config.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => 1,
        StopBits::Two => 2,
    };
    block[5] = config.parity as u8;
    block[6] = config.data_bits;
    block
}
