//! CP210x protocol constants and helpers

use uartlink_core::{LineConfig, Parity, StopBits};

// USB device identifiers
/// Silicon Labs vendor ID
pub const SILABS_VENDOR_ID: u16 = 0x10C4;

/// Known CP210x product IDs
pub const CP210X_PRODUCT_IDS: &[(u16, &str)] = &[
    (0xEA60, "CP2102"),
    (0xEA70, "CP2105"),
    (0xEA71, "CP2108"),
    (0xEA80, "CP2110"),
];

/// Vendor request, host to device, recipient interface
pub const REQTYPE_HOST_TO_INTERFACE: u8 = 0x41;

// Requests
pub const IFC_ENABLE: u8 = 0x00;
pub const SET_BAUDDIV: u8 = 0x01;
pub const SET_LINE_CTL: u8 = 0x03;
pub const SET_MHS: u8 = 0x07;
pub const SET_BAUDRATE: u8 = 0x1E;

/// IFC_ENABLE value that turns the UART on
pub const UART_ENABLE: u16 = 0x0001;

/// Baud rate generator clock, used for the legacy divisor
pub const BAUD_RATE_GEN_FREQ: u32 = 0x384000;

// SET_MHS values: the high byte selects the lines to change
pub const MCR_ALL: u16 = 0x0003;
pub const CONTROL_DTR_ENABLE: u16 = 0x0101;
pub const CONTROL_DTR_DISABLE: u16 = 0x0100;
pub const CONTROL_RTS_ENABLE: u16 = 0x0202;
pub const CONTROL_RTS_DISABLE: u16 = 0x0200;

/// Encode the SET_LINE_CTL word
///
/// Bits 8-11 hold the data bits, bits 4-7 the parity and bits 0-3 the
/// stop bits.
pub fn encode_line_control(config: &LineConfig) -> u16 {
    let data_bits = (config.data_bits as u16) << 8;
    let parity = match config.parity {
        Parity::None => 0x0000,
        Parity::Odd => 0x0010,
        Parity::Even => 0x0020,
        Parity::Mark => 0x0030,
        Parity::Space => 0x0040,
    };
    let stop_bits = match config.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => 1,
        StopBits::Two => 2,
    };
    data_bits | parity | stop_bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_control_word() {
        assert_eq!(encode_line_control(&LineConfig::default()), 0x0800);
        let config = LineConfig::default()
            .with_data_bits(7)
            .with_parity(Parity::Even)
            .with_stop_bits(StopBits::Two);
        assert_eq!(encode_line_control(&config), 0x0722);
        let config = LineConfig::default()
            .with_data_bits(5)
            .with_parity(Parity::Space)
            .with_stop_bits(StopBits::OnePointFive);
        assert_eq!(encode_line_control(&config), 0x0541);
    }

    #[test]
    fn test_legacy_divisor_for_default_baud() {
        assert_eq!(BAUD_RATE_GEN_FREQ / 9600, 384);
    }
}
