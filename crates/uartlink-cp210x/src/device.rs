//! CP210x driver implementation

use std::sync::Arc;

use uartlink_core::line::DEFAULT_BAUD_RATE;
use uartlink_core::{
    find_bulk_endpoints, ControlLines, DeviceDescriptor, DriverOptions, DriverSession, Error,
    LineConfig, Result, SerialDriver, UsbHost,
};

use crate::protocol::*;

/// Silicon Labs CP210x USB-serial bridge
pub struct Cp210xDriver {
    host: Arc<dyn UsbHost>,
    descriptor: DeviceDescriptor,
    options: DriverOptions,
    session: Option<DriverSession>,
    lines: ControlLines,
}

fn set_config(session: &mut DriverSession, message: &str, request: u8, value: u16) -> Result<()> {
    session.control_out(message, REQTYPE_HOST_TO_INTERFACE, request, value, 0, &[])
}

impl Cp210xDriver {
    /// Create a driver for an enumerated device; nothing is opened yet
    pub fn new(
        host: Arc<dyn UsbHost>,
        descriptor: DeviceDescriptor,
        options: DriverOptions,
    ) -> Self {
        Self {
            host,
            descriptor,
            options,
            session: None,
            lines: ControlLines::empty(),
        }
    }

    fn session(&mut self) -> Result<&mut DriverSession> {
        self.session.as_mut().ok_or(Error::NotOpen)
    }

    fn initialize(session: &mut DriverSession, config: &LineConfig) -> Result<()> {
        set_config(session, "Set UART enable failed", IFC_ENABLE, UART_ENABLE)?;
        set_config(
            session,
            "Set modem handshake failed",
            SET_MHS,
            MCR_ALL | CONTROL_DTR_DISABLE | CONTROL_RTS_DISABLE,
        )?;
        set_config(
            session,
            "Set baud divisor failed",
            SET_BAUDDIV,
            (BAUD_RATE_GEN_FREQ / DEFAULT_BAUD_RATE) as u16,
        )?;
        session.control_out(
            "Set baud rate failed",
            REQTYPE_HOST_TO_INTERFACE,
            SET_BAUDRATE,
            0,
            0,
            &config.baud_rate.to_le_bytes(),
        )?;
        set_config(
            session,
            "Set line control failed",
            SET_LINE_CTL,
            encode_line_control(config),
        )
    }
}

impl SerialDriver for Cp210xDriver {
    fn name(&self) -> &'static str {
        "cp210x"
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&mut self, config: &LineConfig) -> Result<()> {
        config.validate()?;
        self.close();

        log::info!(
            "Opening CP210x {} at {}",
            self.descriptor.display_name(),
            config
        );
        let mut session = DriverSession::open(
            self.host.as_ref(),
            &self.descriptor,
            &self.options,
            find_bulk_endpoints,
        )?;

        match Self::initialize(&mut session, config) {
            Ok(()) => {
                // SET_MHS during init raises both lines
                self.lines = ControlLines::DTR | ControlLines::RTS;
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                log::warn!("cp210x: initialization failed: {}", e);
                session.close();
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            log::debug!("cp210x: closed {}", self.descriptor);
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.session()?.write(data)
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        self.session()?.read()
    }

    fn set_control_line(&mut self, lines: ControlLines, enabled: bool) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotOpen)?;

        if lines.contains(ControlLines::DTR) {
            let value = if enabled {
                CONTROL_DTR_ENABLE
            } else {
                CONTROL_DTR_DISABLE
            };
            set_config(session, "Set DTR failed", SET_MHS, value)?;
            self.lines.set(ControlLines::DTR, enabled);
        }
        if lines.contains(ControlLines::RTS) {
            let value = if enabled {
                CONTROL_RTS_ENABLE
            } else {
                CONTROL_RTS_DISABLE
            };
            set_config(session, "Set RTS failed", SET_MHS, value)?;
            self.lines.set(ControlLines::RTS, enabled);
        }
        Ok(())
    }

    fn control_lines(&self) -> ControlLines {
        self.lines
    }

    fn test_connection(&mut self) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.test_connection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uartlink_core::{FlowControl, Parity};
    use uartlink_dummy::{ControlRecord, DummyDevice, DummyHost};

    fn driver_for(device: &DummyDevice) -> Cp210xDriver {
        let host = DummyHost::new().with_device(device.clone());
        Cp210xDriver::new(
            Arc::new(host),
            device.descriptor.clone(),
            DriverOptions::default(),
        )
    }

    fn summary(log: &[ControlRecord]) -> Vec<(u8, u8, u16)> {
        log.iter()
            .map(|r| (r.request_type, r.request, r.value))
            .collect()
    }

    #[test]
    fn test_open_sequence() {
        let dev = DummyDevice::cp210x(0xea60, 3);
        let mut driver = driver_for(&dev);
        let config = LineConfig::new(115_200).with_parity(Parity::Odd);
        driver.open(&config).unwrap();

        let log = dev.control_log();
        assert_eq!(
            summary(&log),
            vec![
                (0x41, 0x00, 0x0001),
                (0x41, 0x07, 0x0303),
                (0x41, 0x01, 384),
                (0x41, 0x1E, 0),
                (0x41, 0x03, 0x0810),
            ]
        );
        assert_eq!(log[3].data, vec![0x00, 0xC2, 0x01, 0x00]);
        assert!(log.iter().all(|r| r.index == 0));
        assert!(driver.is_open());
    }

    #[test]
    fn test_open_uses_first_bulk_pair() {
        let dev = DummyDevice::cp210x(0xea60, 3);
        dev.state().read_chunks.push_back(vec![0x42]);
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        driver.write(&[1, 2, 3]).unwrap();
        assert_eq!(dev.state().written, vec![1, 2, 3]);
        assert_eq!(driver.read().unwrap(), Some(vec![0x42]));
        assert_eq!(driver.read().unwrap(), None);
    }

    #[test]
    fn test_failed_enable_aborts_open() {
        let dev = DummyDevice::cp210x(0xea60, 3);
        dev.state().control_failures.push((IFC_ENABLE, UART_ENABLE));
        let mut driver = driver_for(&dev);
        assert!(matches!(
            driver.open(&LineConfig::default()),
            Err(Error::ControlTransferFailed(_))
        ));
        assert!(!driver.is_open());
        assert_eq!(dev.state().closed, 1);
    }

    #[test]
    fn test_control_lines() {
        let dev = DummyDevice::cp210x(0xea60, 3);
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        assert_eq!(driver.control_lines(), ControlLines::DTR | ControlLines::RTS);
        dev.clear_control_log();

        driver
            .set_control_line(ControlLines::DTR | ControlLines::RTS, true)
            .unwrap();
        driver.set_control_line(ControlLines::DTR, false).unwrap();
        assert_eq!(driver.control_lines(), ControlLines::RTS);
        assert_eq!(
            summary(&dev.control_log()),
            vec![
                (0x41, 0x07, 0x0101),
                (0x41, 0x07, 0x0202),
                (0x41, 0x07, 0x0100),
            ]
        );
    }

    #[test]
    fn test_only_no_flow_control() {
        let dev = DummyDevice::cp210x(0xea60, 3);
        let mut driver = driver_for(&dev);
        assert!(driver.set_flow_control(FlowControl::None).is_ok());
        assert!(matches!(
            driver.set_flow_control(FlowControl::RtsCts),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_closed_driver() {
        let dev = DummyDevice::cp210x(0xea60, 3);
        let mut driver = driver_for(&dev);
        assert!(matches!(driver.read(), Err(Error::NotOpen)));
        assert!(matches!(
            driver.set_control_line(ControlLines::RTS, true),
            Err(Error::NotOpen)
        ));
        assert!(!driver.test_connection());
        driver.close();
        assert_eq!(dev.state().closed, 0);
    }

    #[test]
    fn test_permission_is_requested() {
        let dev = DummyDevice::cp210x(0xea60, 3);
        dev.state().permitted = false;
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        assert_eq!(dev.state().permission_requests, 1);

        let dev = DummyDevice::cp210x(0xea60, 4);
        {
            let mut state = dev.state();
            state.permitted = false;
            state.grant_on_request = false;
        }
        let mut driver = driver_for(&dev);
        assert!(matches!(
            driver.open(&LineConfig::default()),
            Err(Error::PermissionDenied(_))
        ));
    }
}
