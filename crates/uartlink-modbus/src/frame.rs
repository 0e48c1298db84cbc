//! RTU frame construction and response validation

use std::fmt;

use crate::crc::{append_crc, check_crc};
use crate::error::{ErrorKind, ExceptionCode};

// Function codes
pub const READ_COILS: u8 = 0x01;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_COIL: u8 = 0x05;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// High bit of the function code in an exception response
pub const EXCEPTION_BIT: u8 = 0x80;

/// Largest register count a single read may request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Header of a read response: slave id, function code, byte count
pub const READ_HEADER_LEN: usize = 3;
/// A write response is a full echo of the 8-byte request
pub const WRITE_RESPONSE_LEN: usize = 8;
/// Slave id, function code, exception code, CRC
pub const EXCEPTION_FRAME_LEN: usize = 5;
const CRC_LEN: usize = 2;

/// One master request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ReadCoils { slave: u8, address: u16, count: u16 },
    ReadHoldingRegisters { slave: u8, address: u16, count: u16 },
    ReadInputRegisters { slave: u8, address: u16, count: u16 },
    WriteSingleCoil { slave: u8, address: u16, value: bool },
    WriteSingleRegister { slave: u8, address: u16, value: u16 },
}

impl Request {
    pub fn slave(&self) -> u8 {
        match *self {
            Request::ReadCoils { slave, .. }
            | Request::ReadHoldingRegisters { slave, .. }
            | Request::ReadInputRegisters { slave, .. }
            | Request::WriteSingleCoil { slave, .. }
            | Request::WriteSingleRegister { slave, .. } => slave,
        }
    }

    pub fn function(&self) -> u8 {
        match self {
            Request::ReadCoils { .. } => READ_COILS,
            Request::ReadHoldingRegisters { .. } => READ_HOLDING_REGISTERS,
            Request::ReadInputRegisters { .. } => READ_INPUT_REGISTERS,
            Request::WriteSingleCoil { .. } => WRITE_SINGLE_COIL,
            Request::WriteSingleRegister { .. } => WRITE_SINGLE_REGISTER,
        }
    }

    /// Whether the response is an echo of the request
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::WriteSingleCoil { .. } | Request::WriteSingleRegister { .. }
        )
    }

    /// Reject requests that must never reach the wire
    pub fn validate(&self) -> Result<(), ErrorKind> {
        match *self {
            Request::ReadCoils { .. } | Request::WriteSingleCoil { .. } => Err(
                ErrorKind::InvalidArgument("coil access is not implemented".into()),
            ),
            Request::ReadHoldingRegisters { count, .. }
            | Request::ReadInputRegisters { count, .. }
                if count == 0 || count > MAX_READ_REGISTERS =>
            {
                Err(ErrorKind::InvalidArgument(format!(
                    "register count must be between 1 and {}, got {}",
                    MAX_READ_REGISTERS, count
                )))
            }
            _ => Ok(()),
        }
    }

    /// Build the 8-byte request frame including CRC
    pub fn encode(&self) -> Vec<u8> {
        let (field1, field2) = match *self {
            Request::ReadCoils { address, count, .. }
            | Request::ReadHoldingRegisters { address, count, .. }
            | Request::ReadInputRegisters { address, count, .. } => (address, count),
            Request::WriteSingleCoil { address, value, .. } => {
                (address, if value { 0xFF00 } else { 0x0000 })
            }
            Request::WriteSingleRegister { address, value, .. } => (address, value),
        };

        let mut frame = Vec::with_capacity(8);
        frame.push(self.slave());
        frame.push(self.function());
        frame.extend_from_slice(&field1.to_be_bytes());
        frame.extend_from_slice(&field2.to_be_bytes());
        append_crc(&mut frame);
        frame
    }

    /// Bytes to collect before the total response length is known
    pub fn response_header_len(&self) -> usize {
        if self.is_write() {
            WRITE_RESPONSE_LEN
        } else {
            READ_HEADER_LEN
        }
    }

    /// Bytes still expected once the header has arrived
    pub fn remaining_len(&self, header: &[u8]) -> usize {
        if self.is_write() {
            return 0;
        }
        if header[1] & EXCEPTION_BIT != 0 {
            // exception code already in the header, only the CRC is left
            return CRC_LEN;
        }
        header[2] as usize + CRC_LEN
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::ReadCoils {
                slave,
                address,
                count,
            } => write!(
                f,
                "read coils (slave {}, address {}, count {})",
                slave, address, count
            ),
            Request::ReadHoldingRegisters {
                slave,
                address,
                count,
            } => write!(
                f,
                "read holding registers (slave {}, address {}, count {})",
                slave, address, count
            ),
            Request::ReadInputRegisters {
                slave,
                address,
                count,
            } => write!(
                f,
                "read input registers (slave {}, address {}, count {})",
                slave, address, count
            ),
            Request::WriteSingleCoil {
                slave,
                address,
                value,
            } => write!(
                f,
                "write single coil (slave {}, address {}, value {})",
                slave, address, value
            ),
            Request::WriteSingleRegister {
                slave,
                address,
                value,
            } => write!(
                f,
                "write single register (slave {}, address {}, value {})",
                slave, address, value
            ),
        }
    }
}

fn exception(buf: &[u8]) -> ErrorKind {
    ErrorKind::SlaveException {
        function: buf[1] & !EXCEPTION_BIT,
        code: ExceptionCode::from(buf[2]),
    }
}

/// Validate a read response and extract `count` registers
///
/// Checks run in a fixed order: length, slave id, exception bit, declared
/// byte count, CRC. A register count that differs from `count` is padded
/// with zeros or truncated.
pub fn parse_read_response(slave: u8, count: u16, buf: &[u8]) -> Result<Vec<u16>, ErrorKind> {
    if buf.len() < EXCEPTION_FRAME_LEN {
        return Err(ErrorKind::IncompleteResponse {
            expected: EXCEPTION_FRAME_LEN,
            received: buf.len(),
        });
    }
    if buf[0] != slave {
        return Err(ErrorKind::UnexpectedSlaveId {
            expected: slave,
            received: buf[0],
        });
    }
    if buf[1] & EXCEPTION_BIT != 0 {
        return Err(exception(buf));
    }

    let byte_count = buf[2] as usize;
    let data_end = READ_HEADER_LEN + byte_count;
    let expected = data_end + CRC_LEN;
    if buf.len() < expected {
        return Err(ErrorKind::IncompleteResponse {
            expected,
            received: buf.len(),
        });
    }
    check_crc(&buf[..expected])
        .map_err(|(calculated, received)| ErrorKind::CrcMismatch {
            calculated,
            received,
        })?;

    let mut registers: Vec<u16> = buf[READ_HEADER_LEN..data_end]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    if registers.len() != count as usize {
        log::debug!(
            "slave {} returned {} registers, {} requested",
            slave,
            registers.len(),
            count
        );
        registers.resize(count as usize, 0);
    }
    Ok(registers)
}

/// Validate the echo of a write request
///
/// The exception check only applies to a 5-byte frame; a full-length frame
/// with the exception bit set falls through to the function code check.
pub fn parse_write_response(slave: u8, function: u8, buf: &[u8]) -> Result<(), ErrorKind> {
    if buf.len() < EXCEPTION_FRAME_LEN {
        return Err(ErrorKind::IncompleteResponse {
            expected: WRITE_RESPONSE_LEN,
            received: buf.len(),
        });
    }
    if buf[0] != slave {
        return Err(ErrorKind::UnexpectedSlaveId {
            expected: slave,
            received: buf[0],
        });
    }
    if buf.len() == EXCEPTION_FRAME_LEN && buf[1] & EXCEPTION_BIT != 0 {
        return Err(exception(buf));
    }
    if buf.len() < WRITE_RESPONSE_LEN {
        return Err(ErrorKind::IncompleteResponse {
            expected: WRITE_RESPONSE_LEN,
            received: buf.len(),
        });
    }
    check_crc(&buf[..WRITE_RESPONSE_LEN]).map_err(|(calculated, received)| {
        ErrorKind::CrcMismatch {
            calculated,
            received,
        }
    })?;
    if buf[1] != function {
        return Err(ErrorKind::UnexpectedFunctionCode {
            expected: function,
            received: buf[1],
        });
    }
    Ok(())
}

/// Classify a write response that never reached full length
///
/// A slave that rejects a write answers with a 5-byte exception frame, so
/// the echo never completes. When such a frame is intact it is reported as
/// the slave exception instead of a timeout.
pub fn partial_write_exception(slave: u8, buf: &[u8]) -> Option<ErrorKind> {
    if buf.len() < EXCEPTION_FRAME_LEN {
        return None;
    }
    let frame = &buf[..EXCEPTION_FRAME_LEN];
    if frame[0] == slave && frame[1] & EXCEPTION_BIT != 0 && check_crc(frame).is_ok() {
        Some(exception(frame))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16;

    fn with_crc(bytes: &[u8]) -> Vec<u8> {
        let mut frame = bytes.to_vec();
        append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_encode_read_holding() {
        let request = Request::ReadHoldingRegisters {
            slave: 1,
            address: 0,
            count: 2,
        };
        assert_eq!(
            request.encode(),
            [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
        );
    }

    #[test]
    fn test_read_frames_are_eight_bytes_with_crc() {
        for (slave, address, count) in [(1u8, 0u16, 1u16), (17, 0x006B, 3), (247, 0xFFFF, 125)] {
            for request in [
                Request::ReadHoldingRegisters {
                    slave,
                    address,
                    count,
                },
                Request::ReadInputRegisters {
                    slave,
                    address,
                    count,
                },
            ] {
                let frame = request.encode();
                assert_eq!(frame.len(), 8);
                assert_eq!(
                    u16::from_le_bytes([frame[6], frame[7]]),
                    crc16(&frame[..6])
                );
            }
        }
    }

    #[test]
    fn test_encode_write_single_register() {
        let request = Request::WriteSingleRegister {
            slave: 1,
            address: 10,
            value: 5,
        };
        let frame = request.encode();
        assert_eq!(&frame[..6], &[0x01, 0x06, 0x00, 0x0A, 0x00, 0x05]);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn test_validate_register_count() {
        let read = |count| Request::ReadHoldingRegisters {
            slave: 1,
            address: 0,
            count,
        };
        assert!(read(1).validate().is_ok());
        assert!(read(125).validate().is_ok());
        assert!(matches!(
            read(0).validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));
        assert!(matches!(
            read(126).validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_remaining_len() {
        let read = Request::ReadInputRegisters {
            slave: 1,
            address: 0,
            count: 2,
        };
        assert_eq!(read.response_header_len(), 3);
        assert_eq!(read.remaining_len(&[0x01, 0x04, 0x04]), 6);
        assert_eq!(read.remaining_len(&[0x01, 0x84, 0x02]), 2);

        let write = Request::WriteSingleRegister {
            slave: 1,
            address: 0,
            value: 0,
        };
        assert_eq!(write.response_header_len(), 8);
        assert_eq!(write.remaining_len(&[0; 8]), 0);
    }

    #[test]
    fn test_parse_registers() {
        let buf = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x64, 0x00, 0xC8]);
        assert_eq!(parse_read_response(1, 2, &buf).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_parse_resizes_to_requested_count() {
        let buf = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x64, 0x00, 0xC8]);
        assert_eq!(parse_read_response(1, 3, &buf).unwrap(), vec![100, 200, 0]);
        assert_eq!(parse_read_response(1, 1, &buf).unwrap(), vec![100]);
    }

    #[test]
    fn test_validation_order() {
        // wrong slave wins over a broken CRC
        let mut buf = with_crc(&[0x02, 0x03, 0x02, 0x00, 0x01]);
        buf[6] ^= 0xFF;
        assert!(matches!(
            parse_read_response(1, 1, &buf),
            Err(ErrorKind::UnexpectedSlaveId {
                expected: 1,
                received: 2
            })
        ));

        // exception wins over CRC
        let buf = [0x01, 0x83, 0x02, 0x00, 0x00];
        assert!(matches!(
            parse_read_response(1, 1, &buf),
            Err(ErrorKind::SlaveException {
                function: 0x03,
                code: ExceptionCode::IllegalDataAddress
            })
        ));

        // declared byte count longer than the buffer
        let buf = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x01]);
        assert!(matches!(
            parse_read_response(1, 2, &buf),
            Err(ErrorKind::IncompleteResponse {
                expected: 9,
                received: 7
            })
        ));

        assert!(matches!(
            parse_read_response(1, 2, &[0x01, 0x03, 0x04]),
            Err(ErrorKind::IncompleteResponse { .. })
        ));
    }

    #[test]
    fn test_every_payload_bit_flip_is_caught() {
        let good = with_crc(&[0x01, 0x03, 0x04, 0x00, 0x64, 0x00, 0xC8]);
        for byte in 3..good.len() {
            for bit in 0..8 {
                let mut buf = good.clone();
                buf[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        parse_read_response(1, 2, &buf),
                        Err(ErrorKind::CrcMismatch { .. })
                    ),
                    "flip of bit {} in byte {} went unnoticed",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_write_echo_with_exception_function_is_rejected() {
        let buf = with_crc(&[0x01, 0x86, 0x00, 0x0A, 0x00, 0x05]);
        assert!(matches!(
            parse_write_response(1, WRITE_SINGLE_REGISTER, &buf),
            Err(ErrorKind::UnexpectedFunctionCode {
                expected: 0x06,
                received: 0x86
            })
        ));
    }

    #[test]
    fn test_write_echo() {
        let request = Request::WriteSingleRegister {
            slave: 1,
            address: 10,
            value: 5,
        };
        let echo = request.encode();
        assert!(parse_write_response(1, WRITE_SINGLE_REGISTER, &echo).is_ok());

        let mut bad = echo.clone();
        bad[5] ^= 0x01;
        assert!(matches!(
            parse_write_response(1, WRITE_SINGLE_REGISTER, &bad),
            Err(ErrorKind::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_partial_write_exception() {
        let frame = with_crc(&[0x01, 0x86, 0x02]);
        assert!(matches!(
            partial_write_exception(1, &frame),
            Some(ErrorKind::SlaveException {
                function: 0x06,
                code: ExceptionCode::IllegalDataAddress
            })
        ));
        let mut corrupt = frame.clone();
        corrupt[4] ^= 0x10;
        assert!(partial_write_exception(1, &corrupt).is_none());
        assert!(partial_write_exception(2, &frame).is_none());
        assert!(partial_write_exception(1, &frame[..4]).is_none());
    }

    #[test]
    fn test_display_carries_context() {
        let request = Request::ReadInputRegisters {
            slave: 3,
            address: 16,
            count: 4,
        };
        assert_eq!(
            request.to_string(),
            "read input registers (slave 3, address 16, count 4)"
        );
    }
}
