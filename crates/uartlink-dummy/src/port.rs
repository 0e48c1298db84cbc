//! Emulated serial port

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use uartlink_core::driver::DEFAULT_TIMEOUT;
use uartlink_core::usb::TRANSFER_IO_ERROR;
use uartlink_core::{
    ControlLines, DeviceDescriptor, Direction, Error, FlowControl, LineConfig, Result,
    SerialDriver,
};

use crate::slave::ModbusSlave;

/// Configuration for the dummy port
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Modbus slave id answered by the emulator
    pub slave_id: u8,
    pub holding_registers: Vec<u16>,
    pub input_registers: Vec<u16>,
    /// Split replies into chunks of this size (0 keeps them whole)
    pub chunk_size: usize,
    /// How long an empty read blocks before reporting nothing
    pub read_delay: Duration,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            slave_id: 1,
            holding_registers: (0..128).collect(),
            input_registers: (0..128).map(|i| 0x1000 + i).collect(),
            chunk_size: 0,
            read_delay: Duration::from_millis(5),
        }
    }
}

/// State shared between a [`DummyPort`] and its handles
#[derive(Debug, Default)]
pub struct PortState {
    /// Emulated slave, if replies are computed rather than scripted
    pub slave: Option<ModbusSlave>,
    /// Scripted replies, one entry (a list of chunks) consumed per write
    pub scripted: VecDeque<Vec<Vec<u8>>>,
    /// Bytes waiting to be read, one chunk per read
    pub pending: VecDeque<Vec<u8>>,
    /// Every buffer passed to `write`
    pub written: Vec<Vec<u8>>,
    pub chunk_size: usize,
    pub fail_writes: bool,
    pub fail_reads: bool,
    pub reads: usize,
    pub opened: usize,
    pub closed: usize,
    pub line_config: Option<LineConfig>,
}

/// Cloneable view into a port that has been handed to another owner
#[derive(Debug, Clone)]
pub struct DummyPortHandle {
    state: Arc<Mutex<PortState>>,
}

impl DummyPortHandle {
    pub fn state(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the reply to the next write, delivered in the given chunks
    pub fn push_reply(&self, chunks: Vec<Vec<u8>>) {
        self.state().scripted.push_back(chunks);
    }

    /// Queue bytes that are readable right away
    pub fn push_pending(&self, bytes: Vec<u8>) {
        self.state().pending.push_back(bytes);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Holding registers of the emulated slave
    pub fn holding_registers(&self) -> Vec<u16> {
        self.state()
            .slave
            .as_ref()
            .map(|s| s.holding.clone())
            .unwrap_or_default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }
}

/// A [`SerialDriver`] that talks to an in-memory device
pub struct DummyPort {
    descriptor: DeviceDescriptor,
    state: Arc<Mutex<PortState>>,
    read_delay: Duration,
    open: bool,
    lines: ControlLines,
    flow: FlowControl,
}

impl DummyPort {
    /// Port backed by an emulated Modbus slave
    pub fn new(config: DummyConfig) -> Self {
        let state = PortState {
            slave: Some(ModbusSlave::new(
                config.slave_id,
                config.holding_registers,
                config.input_registers,
            )),
            chunk_size: config.chunk_size,
            ..PortState::default()
        };
        Self::with_state(state, config.read_delay)
    }

    /// Port with the default slave configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Port that only answers with scripted replies
    pub fn scripted() -> Self {
        Self::with_state(PortState::default(), DummyConfig::default().read_delay)
    }

    fn with_state(state: PortState, read_delay: Duration) -> Self {
        let descriptor = DeviceDescriptor {
            vendor_id: 0,
            product_id: 0,
            device_id: 0,
            device_class: 0,
            interface_count: 1,
            raw: Vec::new(),
            name: "dummy".into(),
            product_name: Some("Modbus RTU emulator".into()),
        };
        Self {
            descriptor,
            state: Arc::new(Mutex::new(state)),
            read_delay,
            open: false,
            lines: ControlLines::empty(),
            flow: FlowControl::None,
        }
    }

    /// Handle for inspecting the port after it has been moved
    pub fn handle(&self) -> DummyPortHandle {
        DummyPortHandle {
            state: self.state.clone(),
        }
    }

    /// Current flow-control mode
    pub fn flow_control(&self) -> FlowControl {
        self.flow
    }

    fn state(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transfer_error(direction: Direction, length: usize) -> Error {
        Error::BulkTransferFailed {
            direction,
            code: TRANSFER_IO_ERROR,
            endpoint: if direction == Direction::In { 0x81 } else { 0x01 },
            length,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialDriver for DummyPort {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&mut self, config: &LineConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.state();
        state.opened += 1;
        state.line_config = Some(*config);
        drop(state);
        self.open = true;
        log::debug!("dummy: opened at {}", config);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.state().closed += 1;
            self.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        let mut state = self.state();
        if state.fail_writes {
            return Err(Self::transfer_error(Direction::Out, data.len()));
        }
        state.written.push(data.to_vec());

        if let Some(chunks) = state.scripted.pop_front() {
            state.pending.extend(chunks);
        } else if let Some(reply) = state.slave.as_mut().and_then(|s| s.handle(data)) {
            let size = if state.chunk_size == 0 {
                reply.len()
            } else {
                state.chunk_size
            };
            let chunks: Vec<Vec<u8>> = reply.chunks(size).map(<[u8]>::to_vec).collect();
            state.pending.extend(chunks);
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        {
            let mut state = self.state();
            state.reads += 1;
            if state.fail_reads {
                return Err(Self::transfer_error(Direction::In, 4096));
            }
            if let Some(chunk) = state.pending.pop_front() {
                return Ok(Some(chunk));
            }
        }
        std::thread::sleep(self.read_delay);
        Ok(None)
    }

    fn set_control_line(&mut self, lines: ControlLines, enabled: bool) -> Result<()> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        self.lines.set(lines, enabled);
        Ok(())
    }

    fn control_lines(&self) -> ControlLines {
        self.lines
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        self.flow = flow;
        Ok(())
    }

    fn test_connection(&mut self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_requires_open() {
        let mut port = DummyPort::new_default();
        assert!(matches!(port.write(&[1]), Err(Error::NotOpen)));
        assert!(matches!(port.read(), Err(Error::NotOpen)));
        assert!(!port.test_connection());
    }

    #[test]
    fn test_slave_reply_is_chunked() {
        let config = DummyConfig {
            holding_registers: vec![0x0102, 0x0304],
            chunk_size: 4,
            ..DummyConfig::default()
        };
        let mut port = DummyPort::new(config);
        port.open(&LineConfig::default()).unwrap();
        port.write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B])
            .unwrap();

        assert_eq!(port.read().unwrap(), Some(vec![0x01, 0x03, 0x04, 0x01]));
        let second = port.read().unwrap().unwrap();
        assert_eq!(&second[..3], &[0x02, 0x03, 0x04]);
        assert_eq!(port.read().unwrap().map(|c| c.len()), Some(1));
        assert_eq!(port.read().unwrap(), None);
    }

    #[test]
    fn test_scripted_reply_wins_over_slave() {
        let mut port = DummyPort::new_default();
        let handle = port.handle();
        handle.push_reply(vec![vec![0xAA], vec![0xBB]]);
        port.open(&LineConfig::default()).unwrap();
        port.write(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B])
            .unwrap();

        assert_eq!(port.read().unwrap(), Some(vec![0xAA]));
        assert_eq!(port.read().unwrap(), Some(vec![0xBB]));
        assert_eq!(handle.written().len(), 1);
    }

    #[test]
    fn test_control_lines() {
        let mut port = DummyPort::new_default();
        port.open(&LineConfig::default()).unwrap();
        port.set_control_line(ControlLines::DTR | ControlLines::RTS, true)
            .unwrap();
        port.set_control_line(ControlLines::RTS, false).unwrap();
        assert_eq!(port.control_lines(), ControlLines::DTR);
    }
}
