//! PL2303 driver implementation
//!
//! This module provides the `ProlificDriver` struct that sequences the
//! PL2303 control transfers and implements the `SerialDriver` trait.

use std::sync::Arc;

use uartlink_core::{
    ControlLines, DeviceDescriptor, DriverOptions, DriverSession, Endpoints, Error, FlowControl,
    InterfaceDescriptor, LineConfig, Result, SerialDriver, UsbHost,
};

use crate::protocol::*;

/// Prolific PL2303 USB-serial bridge
///
/// The generation of the part is detected on every open. Control-line and
/// flow-control settings survive a close and are re-applied on the next
/// open.
pub struct ProlificDriver {
    host: Arc<dyn UsbHost>,
    descriptor: DeviceDescriptor,
    options: DriverOptions,
    session: Option<DriverSession>,
    device_type: Option<DeviceType>,
    lines: ControlLines,
    flow: FlowControl,
}

/// Control transfers of one open PL2303
struct Pl2303<'a> {
    session: &'a mut DriverSession,
    device_type: DeviceType,
}

impl Pl2303<'_> {
    fn vendor_in(&mut self, value: u16, index: u16) -> Result<Vec<u8>> {
        let request = self.device_type.vendor_read_request();
        self.session
            .control_in("Vendor read failed", VENDOR_IN_REQTYPE, request, value, index, 1)
    }

    fn vendor_out(&mut self, value: u16, index: u16) -> Result<()> {
        let request = self.device_type.vendor_write_request();
        self.session
            .control_out("Vendor write failed", VENDOR_OUT_REQTYPE, request, value, index, &[])
    }

    /// Flush both hardware buffers
    fn purge(&mut self) -> Result<()> {
        if self.device_type.is_hxn() {
            self.vendor_out(RESET_HXN_REQUEST, RESET_HXN_RX_PIPE | RESET_HXN_TX_PIPE)
        } else {
            self.vendor_out(FLUSH_RX_REQUEST, 0)?;
            self.vendor_out(FLUSH_TX_REQUEST, 0)
        }
    }

    fn black_magic(&mut self) -> Result<()> {
        if self.device_type.is_hxn() {
            return Ok(());
        }
        for step in BLACK_MAGIC
            .iter()
            .copied()
            .chain(std::iter::once(black_magic_final(self.device_type)))
        {
            match step {
                MagicStep::In(value, index) => {
                    self.vendor_in(value, index)?;
                }
                MagicStep::Out(value, index) => self.vendor_out(value, index)?,
            }
        }
        Ok(())
    }

    fn set_control_lines(&mut self, lines: ControlLines) -> Result<()> {
        self.session.control_out(
            "Set control lines failed",
            CTRL_OUT_REQTYPE,
            SET_CONTROL_REQUEST,
            lines.bits() as u16,
            0,
            &[],
        )
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        let (value, index) = self.device_type.flow_control_request(flow)?;
        self.vendor_out(value, index)
    }

    fn set_line(&mut self, config: &LineConfig) -> Result<()> {
        self.session.control_out(
            "Set line failed",
            CTRL_OUT_REQTYPE,
            SET_LINE_REQUEST,
            0,
            0,
            &encode_line_coding(config),
        )
    }
}

/// Match the fixed PL2303 endpoint addresses
fn resolve_endpoints(interface: &InterfaceDescriptor) -> Option<Endpoints> {
    let has = |address: u8| interface.endpoints.iter().any(|ep| ep.address == address);
    if !has(READ_EP) || !has(WRITE_EP) {
        return None;
    }
    Some(Endpoints {
        read: READ_EP,
        write: WRITE_EP,
        interrupt: has(INTERRUPT_EP).then_some(INTERRUPT_EP),
    })
}

impl ProlificDriver {
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
            device_type: None,
            lines: ControlLines::empty(),
            flow: FlowControl::None,
        }
    }

    /// Generation detected by the last open
    pub fn device_type(&self) -> Option<DeviceType> {
        self.device_type
    }

    /// Current flow-control mode
    pub fn flow_control(&self) -> FlowControl {
        self.flow
    }

    fn session(&mut self) -> Result<&mut DriverSession> {
        self.session.as_mut().ok_or(Error::NotOpen)
    }

    fn initialize(
        session: &mut DriverSession,
        device_class: u8,
        lines: ControlLines,
        flow: FlowControl,
        config: &LineConfig,
    ) -> Result<DeviceType> {
        let raw = session.raw_descriptors().unwrap_or_default();
        let device_type = DeviceType::classify(device_class, &raw, || {
            session
                .control_in(
                    "HX status probe failed",
                    VENDOR_IN_REQTYPE,
                    VENDOR_READ_REQUEST,
                    HX_STATUS_PROBE_VALUE,
                    0,
                    1,
                )
                .is_ok()
        })?;
        log::debug!("pl2303: detected {:?}", device_type);

        let mut chip = Pl2303 {
            session,
            device_type,
        };
        chip.purge()?;
        chip.black_magic()?;
        chip.set_control_lines(lines)?;
        chip.set_flow_control(flow)?;
        chip.set_line(config)?;
        chip.purge()?;
        Ok(device_type)
    }
}

impl SerialDriver for ProlificDriver {
    fn name(&self) -> &'static str {
        "pl2303"
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&mut self, config: &LineConfig) -> Result<()> {
        config.validate()?;
        self.close();

        log::info!(
            "Opening PL2303 {} at {}",
            self.descriptor.display_name(),
            config
        );
        let mut session = DriverSession::open(
            self.host.as_ref(),
            &self.descriptor,
            &self.options,
            resolve_endpoints,
        )?;

        match Self::initialize(
            &mut session,
            self.descriptor.device_class,
            self.lines,
            self.flow,
            config,
        ) {
            Ok(device_type) => {
                self.device_type = Some(device_type);
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                log::warn!("pl2303: initialization failed: {}", e);
                session.close();
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            log::debug!("pl2303: closed {}", self.descriptor);
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
        let device_type = self.device_type.ok_or(Error::NotOpen)?;
        let mut new_lines = self.lines;
        new_lines.set(lines, enabled);

        let session = self.session()?;
        Pl2303 {
            session,
            device_type,
        }
        .set_control_lines(new_lines)?;
        self.lines = new_lines;
        Ok(())
    }

    fn control_lines(&self) -> ControlLines {
        self.lines
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        match (self.session.as_mut(), self.device_type) {
            (Some(session), Some(device_type)) => {
                Pl2303 {
                    session,
                    device_type,
                }
                .set_flow_control(flow)?;
            }
            // Validated now, applied on the next open
            _ => {
                DeviceType::TypeHx.flow_control_request(flow)?;
            }
        }
        self.flow = flow;
        Ok(())
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
    use uartlink_core::Parity;
    use uartlink_dummy::{raw_device_descriptor, ControlRecord, DummyDevice, DummyHost};

    fn device(usb: u16, class: u8, mps: u8, dev: u16) -> DummyDevice {
        let raw = raw_device_descriptor(usb, class, mps, PROLIFIC_VENDOR_ID, 0x2303, dev);
        DummyDevice::pl2303(0x2303, 0x0102, raw)
    }

    fn driver_for(device: &DummyDevice) -> ProlificDriver {
        let host = DummyHost::new().with_device(device.clone());
        ProlificDriver::new(
            Arc::new(host),
            device.descriptor.clone(),
            DriverOptions::default(),
        )
    }

    fn summary(log: &[ControlRecord]) -> Vec<(u8, u8, u16, u16)> {
        log.iter()
            .map(|r| (r.request_type, r.request, r.value, r.index))
            .collect()
    }

    #[test]
    fn test_open_hx_sequence() {
        let dev = device(0x0110, 0, 64, 0x0300);
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        assert_eq!(driver.device_type(), Some(DeviceType::TypeHx));

        let log = dev.control_log();
        assert_eq!(
            summary(&log),
            vec![
                (0x40, 0x01, 0x08, 0),
                (0x40, 0x01, 0x09, 0),
                (0xC0, 0x01, 0x8484, 0),
                (0x40, 0x01, 0x0404, 0),
                (0xC0, 0x01, 0x8484, 0),
                (0xC0, 0x01, 0x8383, 0),
                (0xC0, 0x01, 0x8484, 0),
                (0x40, 0x01, 0x0404, 1),
                (0xC0, 0x01, 0x8484, 0),
                (0xC0, 0x01, 0x8383, 0),
                (0x40, 0x01, 0, 1),
                (0x40, 0x01, 1, 0),
                (0x40, 0x01, 2, 0x44),
                (0x21, 0x22, 0, 0),
                (0x40, 0x01, 0, 0),
                (0x21, 0x20, 0, 0),
                (0x40, 0x01, 0x08, 0),
                (0x40, 0x01, 0x09, 0),
            ]
        );
        assert_eq!(log[15].data, vec![0x80, 0x25, 0x00, 0x00, 0, 0, 8]);
        assert_eq!(dev.state().claimed, Some(0));
    }

    #[test]
    fn test_open_hxn_sequence() {
        let dev = device(0x0200, 0, 64, 0x0100);
        let mut driver = driver_for(&dev);
        let config = LineConfig::new(19_200).with_parity(Parity::Odd);
        driver.open(&config).unwrap();
        assert_eq!(driver.device_type(), Some(DeviceType::TypeHxn));

        let log = dev.control_log();
        assert_eq!(
            summary(&log),
            vec![
                (0x40, 0x80, 0x07, 3),
                (0x21, 0x22, 0, 0),
                (0x40, 0x80, 0x0A, 0xFF),
                (0x21, 0x20, 0, 0),
                (0x40, 0x80, 0x07, 3),
            ]
        );
        assert_eq!(log[3].data, vec![0x00, 0x4B, 0x00, 0x00, 0, 1, 8]);
    }

    #[test]
    fn test_probe_detects_type_t() {
        let dev = device(0x0200, 0, 64, 0x0500);
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        assert_eq!(driver.device_type(), Some(DeviceType::TypeT));
        assert_eq!(summary(&dev.control_log())[0], (0xC0, 0x01, 0x8080, 0));
    }

    #[test]
    fn test_failed_probe_means_hxn() {
        let dev = device(0x0200, 0, 64, 0x0300);
        dev.state().control_failures.push((0x01, 0x8080));
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        assert_eq!(driver.device_type(), Some(DeviceType::TypeHxn));
    }

    #[test]
    fn test_type01_magic_uses_0x24() {
        let dev = device(0x0110, 0x02, 64, 0x0300);
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        assert_eq!(driver.device_type(), Some(DeviceType::Type01));
        assert!(summary(&dev.control_log()).contains(&(0x40, 0x01, 2, 0x24)));
    }

    #[test]
    fn test_short_descriptor_fails_open() {
        let mut dev = device(0x0110, 0, 64, 0x0300);
        dev.descriptor.raw.truncate(10);
        let mut driver = driver_for(&dev);
        assert!(matches!(
            driver.open(&LineConfig::default()),
            Err(Error::InvalidDescriptor(_))
        ));
        assert!(!driver.is_open());
        assert_eq!(dev.state().closed, 1);
    }

    #[test]
    fn test_control_failure_fails_open() {
        let dev = device(0x0110, 0, 64, 0x0300);
        dev.state().control_failures.push((0x22, 0));
        let mut driver = driver_for(&dev);
        match driver.open(&LineConfig::default()) {
            Err(Error::ControlTransferFailed(ctx)) => {
                assert_eq!(ctx.request, SET_CONTROL_REQUEST);
                assert_eq!(ctx.request_type, CTRL_OUT_REQTYPE);
            }
            other => panic!("unexpected result {:?}", other.err()),
        }
        assert!(!driver.is_open());
    }

    #[test]
    fn test_control_lines() {
        let dev = device(0x0110, 0, 64, 0x0300);
        let mut driver = driver_for(&dev);
        assert!(matches!(
            driver.set_control_line(ControlLines::DTR, true),
            Err(Error::NotOpen)
        ));
        driver.open(&LineConfig::default()).unwrap();
        dev.clear_control_log();

        driver.set_control_line(ControlLines::DTR, true).unwrap();
        driver.set_control_line(ControlLines::RTS, true).unwrap();
        driver.set_control_line(ControlLines::DTR, false).unwrap();
        assert_eq!(driver.control_lines(), ControlLines::RTS);
        assert_eq!(
            summary(&dev.control_log()),
            vec![(0x21, 0x22, 1, 0), (0x21, 0x22, 3, 0), (0x21, 0x22, 2, 0)]
        );

        // Re-applied on the next open
        driver.close();
        dev.clear_control_log();
        driver.open(&LineConfig::default()).unwrap();
        assert!(summary(&dev.control_log()).contains(&(0x21, 0x22, 2, 0)));
    }

    #[test]
    fn test_flow_control() {
        let dev = device(0x0110, 0, 64, 0x0300);
        let mut driver = driver_for(&dev);
        driver.open(&LineConfig::default()).unwrap();
        dev.clear_control_log();

        driver.set_flow_control(FlowControl::RtsCts).unwrap();
        assert_eq!(summary(&dev.control_log()), vec![(0x40, 0x01, 0, 0x61)]);
        assert_eq!(driver.flow_control(), FlowControl::RtsCts);

        assert!(matches!(
            driver.set_flow_control(FlowControl::DtrDsr),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(driver.flow_control(), FlowControl::RtsCts);
    }

    #[test]
    fn test_read_write() {
        let dev = device(0x0110, 0, 64, 0x0300);
        dev.state().read_chunks.push_back(vec![0x01, 0x03]);
        let mut driver = driver_for(&dev);
        assert!(matches!(driver.write(&[1]), Err(Error::NotOpen)));

        driver.open(&LineConfig::default()).unwrap();
        driver.write(&[0xAA, 0x55]).unwrap();
        assert_eq!(dev.state().written, vec![0xAA, 0x55]);
        assert_eq!(driver.read().unwrap(), Some(vec![0x01, 0x03]));
        assert_eq!(driver.read().unwrap(), None);
    }

    #[test]
    fn test_test_connection_and_close() {
        let dev = device(0x0110, 0, 64, 0x0300);
        let mut driver = driver_for(&dev);
        assert!(!driver.test_connection());
        driver.open(&LineConfig::default()).unwrap();
        assert!(driver.test_connection());

        dev.state().control_failures.push((0x00, 0));
        assert!(!driver.test_connection());

        driver.close();
        driver.close();
        assert_eq!(dev.state().closed, 1);
    }

    #[test]
    fn test_missing_endpoints() {
        let mut dev = device(0x0110, 0, 64, 0x0300);
        dev.interfaces[0].endpoints.retain(|ep| ep.address != READ_EP);
        let mut driver = driver_for(&dev);
        assert!(matches!(
            driver.open(&LineConfig::default()),
            Err(Error::EndpointsNotFound { interface: 0 })
        ));
    }
}
