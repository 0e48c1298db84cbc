//! Minimal Modbus RTU slave

const READ_HOLDING_REGISTERS: u8 = 0x03;
const READ_INPUT_REGISTERS: u8 = 0x04;
const WRITE_SINGLE_REGISTER: u8 = 0x06;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

/// CRC-16/MODBUS (reflected 0xA001, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Register-backed slave answering function codes 0x03, 0x04 and 0x06
///
/// Frames with a bad CRC or another slave id are ignored, like on a real
/// bus.
#[derive(Debug, Clone)]
pub struct ModbusSlave {
    pub slave_id: u8,
    pub holding: Vec<u16>,
    pub input: Vec<u16>,
}

impl ModbusSlave {
    pub fn new(slave_id: u8, holding: Vec<u16>, input: Vec<u16>) -> Self {
        Self {
            slave_id,
            holding,
            input,
        }
    }

    /// Process one request frame and build the reply, if any
    pub fn handle(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < 4 {
            return None;
        }
        let (body, crc) = frame.split_at(frame.len() - 2);
        if crc16(body) != u16::from_le_bytes([crc[0], crc[1]]) {
            log::debug!("dummy slave: dropping frame with bad CRC");
            return None;
        }
        if body[0] != self.slave_id {
            return None;
        }

        let function = body[1];
        let reply = match function {
            READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS if body.len() == 6 => {
                let address = u16::from_be_bytes([body[2], body[3]]) as usize;
                let count = u16::from_be_bytes([body[4], body[5]]) as usize;
                let bank = if function == READ_HOLDING_REGISTERS {
                    &self.holding
                } else {
                    &self.input
                };
                if count == 0 || count > 125 {
                    self.exception(function, ILLEGAL_DATA_VALUE)
                } else if address + count > bank.len() {
                    self.exception(function, ILLEGAL_DATA_ADDRESS)
                } else {
                    let mut out = vec![self.slave_id, function, (count * 2) as u8];
                    for reg in &bank[address..address + count] {
                        out.extend_from_slice(&reg.to_be_bytes());
                    }
                    with_crc(out)
                }
            }
            WRITE_SINGLE_REGISTER if body.len() == 6 => {
                let address = u16::from_be_bytes([body[2], body[3]]) as usize;
                let value = u16::from_be_bytes([body[4], body[5]]);
                if address < self.holding.len() {
                    self.holding[address] = value;
                    frame.to_vec()
                } else {
                    self.exception(function, ILLEGAL_DATA_ADDRESS)
                }
            }
            _ => self.exception(function, ILLEGAL_FUNCTION),
        };
        Some(reply)
    }

    fn exception(&self, function: u8, code: u8) -> Vec<u8> {
        with_crc(vec![self.slave_id, function | 0x80, code])
    }
}
