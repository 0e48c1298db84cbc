//! Emulated USB host

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use uartlink_core::usb::{TRANSFER_IO_ERROR, TRANSFER_TIMEOUT};
use uartlink_core::{
    DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor, StandardDescriptor, TransferType,
    UsbConnection, UsbHost,
};

/// One control transfer as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Data stage of OUT requests, empty for IN requests
    pub data: Vec<u8>,
    /// Requested length
    pub length: usize,
}

/// Mutable state of an emulated device, shared with the test
#[derive(Debug, Default)]
pub struct DeviceState {
    pub permitted: bool,
    /// Whether `request_permission` grants access
    pub grant_on_request: bool,
    pub permission_requests: usize,
    pub refuse_open: bool,
    pub refuse_claim: bool,
    pub claimed: Option<u8>,
    pub opened: usize,
    pub closed: usize,
    pub control_log: Vec<ControlRecord>,
    /// Responses for control IN requests, keyed by (request, value)
    pub control_responses: HashMap<(u8, u16), Vec<u8>>,
    /// Control requests that fail, keyed by (request, value)
    pub control_failures: Vec<(u8, u16)>,
    /// Everything written to bulk OUT endpoints
    pub written: Vec<u8>,
    /// Chunks served to bulk IN reads, in order
    pub read_chunks: VecDeque<Vec<u8>>,
    /// Result code returned by every bulk transfer when set
    pub bulk_error: Option<i32>,
}

/// An emulated USB device
#[derive(Debug, Clone)]
pub struct DummyDevice {
    pub descriptor: DeviceDescriptor,
    pub interfaces: Vec<InterfaceDescriptor>,
    state: Arc<Mutex<DeviceState>>,
}

/// Build a standard device descriptor with the fields drivers look at
pub fn raw_device_descriptor(
    usb_version: u16,
    device_class: u8,
    max_packet_size: u8,
    vendor_id: u16,
    product_id: u16,
    device_version: u16,
) -> Vec<u8> {
    StandardDescriptor {
        usb_version,
        class: device_class,
        max_packet_size_0: max_packet_size,
        vendor_id,
        product_id,
        device_version,
        ..Default::default()
    }
    .to_bytes()
}

fn bulk(address: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        address,
        transfer_type: TransferType::Bulk,
        max_packet_size: 64,
    }
}

impl DummyDevice {
    /// Create a permitted device with the given descriptor and interfaces
    pub fn new(descriptor: DeviceDescriptor, interfaces: Vec<InterfaceDescriptor>) -> Self {
        let state = DeviceState {
            permitted: true,
            grant_on_request: true,
            ..DeviceState::default()
        };
        Self {
            descriptor,
            interfaces,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A PL2303-style device with the fixed 0x81/0x02/0x83 endpoint layout
    pub fn pl2303(product_id: u16, device_id: u32, raw: Vec<u8>) -> Self {
        let descriptor = DeviceDescriptor {
            vendor_id: 0x067b,
            product_id,
            device_id,
            device_class: raw.get(4).copied().unwrap_or(0),
            interface_count: 1,
            raw,
            name: format!("/dev/bus/usb/001/{:03}", device_id & 0xff),
            product_name: Some("USB-Serial Controller".into()),
        };
        let interface = InterfaceDescriptor {
            number: 0,
            class: 0xff,
            endpoints: vec![
                EndpointDescriptor {
                    address: 0x81,
                    transfer_type: TransferType::Interrupt,
                    max_packet_size: 10,
                },
                bulk(0x02),
                bulk(0x83),
            ],
        };
        Self::new(descriptor, vec![interface])
    }

    /// A CP210x-style device with one bulk IN and one bulk OUT endpoint
    pub fn cp210x(product_id: u16, device_id: u32) -> Self {
        let descriptor = DeviceDescriptor {
            vendor_id: 0x10c4,
            product_id,
            device_id,
            device_class: 0,
            interface_count: 1,
            raw: raw_device_descriptor(0x0110, 0, 64, 0x10c4, product_id, 0x0100),
            name: format!("/dev/bus/usb/001/{:03}", device_id & 0xff),
            product_name: Some("CP2102 USB to UART Bridge Controller".into()),
        };
        let interface = InterfaceDescriptor {
            number: 0,
            class: 0xff,
            endpoints: vec![bulk(0x81), bulk(0x01)],
        };
        Self::new(descriptor, vec![interface])
    }

    /// Access the shared state
    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Control transfers recorded so far
    pub fn control_log(&self) -> Vec<ControlRecord> {
        self.state().control_log.clone()
    }

    /// Forget recorded control transfers
    pub fn clear_control_log(&self) {
        self.state().control_log.clear();
    }
}

/// Emulated USB host holding a fixed set of devices
#[derive(Debug, Default, Clone)]
pub struct DummyHost {
    devices: Vec<DummyDevice>,
}

impl DummyHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: DummyDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn add_device(&mut self, device: DummyDevice) {
        self.devices.push(device);
    }

    pub fn devices(&self) -> &[DummyDevice] {
        &self.devices
    }

    fn find(&self, device: &DeviceDescriptor) -> Option<&DummyDevice> {
        self.devices
            .iter()
            .find(|d| d.descriptor.device_id == device.device_id)
    }
}

impl UsbHost for DummyHost {
    fn enumerate_devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.iter().map(|d| d.descriptor.clone()).collect()
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        self.find(device).is_some_and(|d| d.state().permitted)
    }

    fn request_permission(&self, device: &DeviceDescriptor) {
        if let Some(d) = self.find(device) {
            let mut state = d.state();
            state.permission_requests += 1;
            if state.grant_on_request {
                state.permitted = true;
            }
        }
    }

    fn open_connection(&self, device: &DeviceDescriptor) -> Option<Box<dyn UsbConnection>> {
        let d = self.find(device)?;
        {
            let mut state = d.state();
            if state.refuse_open {
                return None;
            }
            state.opened += 1;
        }
        Some(Box::new(DummyConnection { device: d.clone() }))
    }
}

/// Connection to a [`DummyDevice`]
pub struct DummyConnection {
    device: DummyDevice,
}

impl UsbConnection for DummyConnection {
    fn interfaces(&self) -> Vec<InterfaceDescriptor> {
        self.device.interfaces.clone()
    }

    fn raw_descriptors(&self) -> Option<Vec<u8>> {
        let raw = &self.device.descriptor.raw;
        if raw.is_empty() {
            None
        } else {
            Some(raw.clone())
        }
    }

    fn claim_interface(&mut self, interface: u8, _force: bool) -> bool {
        let mut state = self.device.state();
        if state.refuse_claim {
            return false;
        }
        state.claimed = Some(interface);
        true
    }

    fn bulk_transfer(&mut self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> i32 {
        let mut state = self.device.state();
        if let Some(code) = state.bulk_error {
            return code;
        }

        if endpoint & 0x80 == 0 {
            state.written.extend_from_slice(buf);
            return buf.len() as i32;
        }

        let Some(mut chunk) = state.read_chunks.pop_front() else {
            return TRANSFER_TIMEOUT;
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            state.read_chunks.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        chunk.len() as i32
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
        let mut state = self.device.state();
        let is_in = request_type & 0x80 != 0;
        state.control_log.push(ControlRecord {
            request_type,
            request,
            value,
            index,
            data: if is_in { Vec::new() } else { buf.to_vec() },
            length: buf.len(),
        });

        if state.control_failures.contains(&(request, value)) {
            return TRANSFER_IO_ERROR;
        }

        if is_in {
            if let Some(response) = state.control_responses.get(&(request, value)) {
                let len = response.len().min(buf.len());
                buf[..len].copy_from_slice(&response[..len]);
                return len as i32;
            }
            buf.fill(0);
        }
        buf.len() as i32
    }

    fn close(&mut self) {
        let mut state = self.device.state();
        state.claimed = None;
        state.closed += 1;
    }
}
