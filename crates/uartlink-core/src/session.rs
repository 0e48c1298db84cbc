//! Open-device state shared by all chip families
//!
//! A [`DriverSession`] is created when a driver opens its device and
//! dropped when it closes. It owns the connection and the resolved
//! endpoints, and provides the transfer primitives every family builds on:
//! bulk read/write with the session timeouts, and control transfers that
//! validate the returned length.

use crate::driver::{DriverOptions, Timeouts, DEFAULT_BUFFER_LENGTH, TEST_CONNECTION_TIMEOUT};
use crate::error::{ControlTransferError, Error, Result};
use crate::usb::{
    DeviceDescriptor, Direction, InterfaceDescriptor, TransferType, UsbConnection, UsbHost,
    ENDPOINT_DIR_IN, TRANSFER_TIMEOUT,
};

/// bmRequestType for a standard device-to-host request
const REQTYPE_STANDARD_IN: u8 = 0x80;
/// GET_STATUS standard request
const REQUEST_GET_STATUS: u8 = 0x00;

/// Endpoint addresses resolved for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub read: u8,
    pub write: u8,
    pub interrupt: Option<u8>,
}

/// Pick the first bulk IN and bulk OUT endpoints of an interface
pub fn find_bulk_endpoints(interface: &InterfaceDescriptor) -> Option<Endpoints> {
    let mut read = None;
    let mut write = None;

    for ep in &interface.endpoints {
        if ep.transfer_type != TransferType::Bulk {
            continue;
        }
        match ep.direction() {
            Direction::In if read.is_none() => read = Some(ep.address),
            Direction::Out if write.is_none() => write = Some(ep.address),
            _ => {}
        }
    }

    Some(Endpoints {
        read: read?,
        write: write?,
        interrupt: None,
    })
}

/// State of an open driver
pub struct DriverSession {
    conn: Box<dyn UsbConnection>,
    interface: u8,
    endpoints: Endpoints,
    timeouts: Timeouts,
    buffer: Vec<u8>,
}

impl DriverSession {
    /// Open the device, claim the interface and resolve endpoints
    ///
    /// `resolve` receives the claimed interface descriptor and picks the
    /// endpoints the family needs.
    pub fn open<F>(
        host: &dyn UsbHost,
        device: &DeviceDescriptor,
        options: &DriverOptions,
        resolve: F,
    ) -> Result<Self>
    where
        F: FnOnce(&InterfaceDescriptor) -> Option<Endpoints>,
    {
        if !host.has_permission(device) {
            log::info!("Requesting permission for {}", device);
            host.request_permission(device);
            if !host.has_permission(device) {
                return Err(Error::PermissionDenied(device.to_string()));
            }
        }

        let mut conn = host
            .open_connection(device)
            .ok_or_else(|| Error::OpenFailed(device.to_string()))?;

        let interface = options.interface;
        if !conn.claim_interface(interface, true) {
            conn.close();
            return Err(Error::InterfaceClaimFailed { interface });
        }

        let endpoints = conn
            .interfaces()
            .iter()
            .find(|i| i.number == interface)
            .and_then(resolve);
        let endpoints = match endpoints {
            Some(eps) => eps,
            None => {
                conn.close();
                return Err(Error::EndpointsNotFound { interface });
            }
        };

        log::debug!(
            "Using interface {}, IN EP 0x{:02X}, OUT EP 0x{:02X}, INT EP {:?}",
            interface,
            endpoints.read,
            endpoints.write,
            endpoints.interrupt
        );

        Ok(Self {
            conn,
            interface,
            endpoints,
            timeouts: options.timeouts,
            buffer: vec![0; DEFAULT_BUFFER_LENGTH],
        })
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Raw device descriptors from the open connection
    pub fn raw_descriptors(&self) -> Option<Vec<u8>> {
        self.conn.raw_descriptors()
    }

    /// Bulk OUT bounded by the write timeout
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let endpoint = self.endpoints.write;
        let timeout = self.timeouts.write;
        // bulk_transfer takes a mutable buffer for both directions
        let mut out = data.to_vec();
        let result = self.conn.bulk_transfer(endpoint, &mut out, timeout);
        if result < 0 {
            return Err(Error::BulkTransferFailed {
                direction: Direction::Out,
                code: result,
                endpoint,
                length: data.len(),
                timeout,
            });
        }
        log::trace!("Bulk write {} bytes: {:02X?}", data.len(), data);
        Ok(())
    }

    /// Bulk IN into the scratch buffer bounded by the read timeout
    pub fn read(&mut self) -> Result<Option<Vec<u8>>> {
        let endpoint = self.endpoints.read;
        let timeout = self.timeouts.read;
        let result = self.conn.bulk_transfer(endpoint, &mut self.buffer, timeout);

        if result == TRANSFER_TIMEOUT || result == 0 {
            return Ok(None);
        }
        if result < 0 {
            return Err(Error::BulkTransferFailed {
                direction: Direction::In,
                code: result,
                endpoint,
                length: self.buffer.len(),
                timeout,
            });
        }

        let len = (result as usize).min(self.buffer.len());
        let data = self.buffer[..len].to_vec();
        log::trace!("Bulk read {} bytes: {:02X?}", len, data);
        Ok(Some(data))
    }

    /// Control transfer from host to device; the full data stage must go out
    pub fn control_out(
        &mut self,
        message: &str,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<()> {
        let timeout = self.timeouts.control;
        let mut buf = data.to_vec();
        let result = self
            .conn
            .control_transfer(request_type, request, value, index, &mut buf, timeout);
        if result != data.len() as i32 {
            return Err(ControlTransferError {
                message: message.to_string(),
                result,
                request_type,
                request,
                value,
                index,
                length: data.len(),
                timeout,
            }
            .into());
        }
        log::trace!(
            "Control OUT 0x{:02X}/0x{:02X} value=0x{:04X} index=0x{:04X} data={:02X?}",
            request_type,
            request,
            value,
            index,
            data
        );
        Ok(())
    }

    /// Control transfer from device to host; exactly `length` bytes must come back
    pub fn control_in(
        &mut self,
        message: &str,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        let timeout = self.timeouts.control;
        let mut buf = vec![0u8; length];
        let result = self.conn.control_transfer(
            request_type | ENDPOINT_DIR_IN,
            request,
            value,
            index,
            &mut buf,
            timeout,
        );
        if result != length as i32 {
            return Err(ControlTransferError {
                message: message.to_string(),
                result,
                request_type: request_type | ENDPOINT_DIR_IN,
                request,
                value,
                index,
                length,
                timeout,
            }
            .into());
        }
        log::trace!(
            "Control IN 0x{:02X}/0x{:02X} value=0x{:04X} index=0x{:04X} -> {:02X?}",
            request_type,
            request,
            value,
            index,
            buf
        );
        Ok(buf)
    }

    /// GET_STATUS liveness probe
    pub fn test_connection(&mut self) -> bool {
        let mut buf = [0u8; 2];
        let result = self.conn.control_transfer(
            REQTYPE_STANDARD_IN,
            REQUEST_GET_STATUS,
            0,
            0,
            &mut buf,
            TEST_CONNECTION_TIMEOUT,
        );
        result == 2
    }

    /// Release the connection
    pub fn close(mut self) {
        self.conn.close();
        log::debug!("Closed session on interface {}", self.interface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::EndpointDescriptor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Log {
        closed: bool,
        control: Vec<(u8, u8, u16, u16, usize)>,
    }

    struct FakeConn {
        log: Arc<Mutex<Log>>,
        claim_ok: bool,
        control_result: Option<i32>,
        bulk_result: i32,
    }

    impl UsbConnection for FakeConn {
        fn interfaces(&self) -> Vec<InterfaceDescriptor> {
            vec![InterfaceDescriptor {
                number: 0,
                class: 0xFF,
                endpoints: vec![
                    EndpointDescriptor {
                        address: 0x81,
                        transfer_type: TransferType::Interrupt,
                        max_packet_size: 10,
                    },
                    EndpointDescriptor {
                        address: 0x82,
                        transfer_type: TransferType::Bulk,
                        max_packet_size: 64,
                    },
                    EndpointDescriptor {
                        address: 0x01,
                        transfer_type: TransferType::Bulk,
                        max_packet_size: 64,
                    },
                ],
            }]
        }

        fn raw_descriptors(&self) -> Option<Vec<u8>> {
            None
        }

        fn claim_interface(&mut self, _interface: u8, _force: bool) -> bool {
            self.claim_ok
        }

        fn bulk_transfer(&mut self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> i32 {
            if self.bulk_result > 0 && buf.len() >= 3 {
                buf[..3].copy_from_slice(&[1, 2, 3]);
            }
            self.bulk_result
        }

        fn control_transfer(
            &mut self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> i32 {
            self.log
                .lock()
                .unwrap()
                .control
                .push((request_type, request, value, index, buf.len()));
            self.control_result.unwrap_or(buf.len() as i32)
        }

        fn close(&mut self) {
            self.log.lock().unwrap().closed = true;
        }
    }

    struct FakeHost {
        log: Arc<Mutex<Log>>,
        permitted: bool,
        claim_ok: bool,
        control_result: Option<i32>,
        bulk_result: i32,
    }

    impl FakeHost {
        fn new() -> Self {
            Self {
                log: Arc::default(),
                permitted: true,
                claim_ok: true,
                control_result: None,
                bulk_result: 3,
            }
        }
    }

    impl UsbHost for FakeHost {
        fn enumerate_devices(&self) -> Vec<DeviceDescriptor> {
            vec![device()]
        }

        fn has_permission(&self, _device: &DeviceDescriptor) -> bool {
            self.permitted
        }

        fn request_permission(&self, _device: &DeviceDescriptor) {}

        fn open_connection(&self, _device: &DeviceDescriptor) -> Option<Box<dyn UsbConnection>> {
            Some(Box::new(FakeConn {
                log: self.log.clone(),
                claim_ok: self.claim_ok,
                control_result: self.control_result,
                bulk_result: self.bulk_result,
            }))
        }
    }

    fn device() -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: 0x10c4,
            product_id: 0xea60,
            device_id: 1,
            device_class: 0,
            interface_count: 1,
            raw: Vec::new(),
            name: "fake".into(),
            product_name: None,
        }
    }

    fn open(host: &FakeHost) -> Result<DriverSession> {
        DriverSession::open(host, &device(), &DriverOptions::default(), find_bulk_endpoints)
    }

    #[test]
    fn test_find_bulk_endpoints_skips_interrupt() {
        let host = FakeHost::new();
        let session = open(&host).unwrap();
        assert_eq!(
            session.endpoints(),
            Endpoints {
                read: 0x82,
                write: 0x01,
                interrupt: None
            }
        );
    }

    #[test]
    fn test_permission_denied() {
        let mut host = FakeHost::new();
        host.permitted = false;
        assert!(matches!(open(&host), Err(Error::PermissionDenied(_))));
    }

    #[test]
    fn test_claim_failure_closes_connection() {
        let mut host = FakeHost::new();
        host.claim_ok = false;
        assert!(matches!(
            open(&host),
            Err(Error::InterfaceClaimFailed { interface: 0 })
        ));
        assert!(host.log.lock().unwrap().closed);
    }

    #[test]
    fn test_missing_endpoints() {
        let host = FakeHost::new();
        let result = DriverSession::open(&host, &device(), &DriverOptions::default(), |_| None);
        assert!(matches!(
            result,
            Err(Error::EndpointsNotFound { interface: 0 })
        ));
    }

    #[test]
    fn test_read_timeout_is_empty() {
        let mut host = FakeHost::new();
        host.bulk_result = TRANSFER_TIMEOUT;
        let mut session = open(&host).unwrap();
        assert_eq!(session.read().unwrap(), None);
    }

    #[test]
    fn test_read_returns_received_bytes() {
        let host = FakeHost::new();
        let mut session = open(&host).unwrap();
        assert_eq!(session.read().unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_bulk_failure_is_error() {
        let mut host = FakeHost::new();
        host.bulk_result = -4;
        let mut session = open(&host).unwrap();
        assert!(matches!(
            session.read(),
            Err(Error::BulkTransferFailed {
                direction: Direction::In,
                code: -4,
                ..
            })
        ));
        assert!(matches!(
            session.write(&[0x55]),
            Err(Error::BulkTransferFailed {
                direction: Direction::Out,
                ..
            })
        ));
    }

    #[test]
    fn test_control_length_mismatch() {
        let mut host = FakeHost::new();
        host.control_result = Some(1);
        let mut session = open(&host).unwrap();
        let err = session
            .control_in("Probe failed", 0xC0, 0x01, 0x8080, 0, 2)
            .unwrap_err();
        match err {
            Error::ControlTransferFailed(ctx) => {
                assert_eq!(ctx.result, 1);
                assert_eq!(ctx.request_type, 0xC0);
                assert_eq!(ctx.value, 0x8080);
                assert_eq!(ctx.length, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_test_connection_uses_get_status() {
        let host = FakeHost::new();
        let mut session = open(&host).unwrap();
        assert!(session.test_connection());
        let log = host.log.lock().unwrap();
        assert_eq!(log.control.last(), Some(&(0x80, 0x00, 0, 0, 2)));
    }

    #[test]
    fn test_close_releases_connection() {
        let host = FakeHost::new();
        let session = open(&host).unwrap();
        session.close();
        assert!(host.log.lock().unwrap().closed);
    }
}
