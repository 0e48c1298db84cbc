//! CRC-16/MODBUS
//!
//! Reflected polynomial 0xA001, initial value 0xFFFF, no final XOR. The
//! checksum is appended low byte first.

/// Compute the checksum over `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the checksum of `frame` in wire order
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Compare the trailing checksum of `frame` with the computed one
///
/// Returns `(calculated, received)` on mismatch. Frames shorter than the
/// checksum itself never match.
pub fn check_crc(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < 2 {
        return Err((crc16(&[]), 0));
    }
    let (payload, tail) = frame.split_at(frame.len() - 2);
    let calculated = crc16(payload);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    if calculated == received {
        Ok(())
    } else {
        Err((calculated, received))
    }
}
