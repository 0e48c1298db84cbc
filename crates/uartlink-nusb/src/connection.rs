//! Blocking transfers on an open nusb device

use std::collections::HashMap;
use std::time::Duration;

use nusb::descriptors::TransferType as NusbTransferType;
use nusb::transfer::{
    Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient, TransferError,
};
use nusb::{Endpoint, MaybeFuture};
use uartlink_core::usb::{
    ENDPOINT_DIR_IN, TRANSFER_IO_ERROR, TRANSFER_NO_DEVICE, TRANSFER_STALL, TRANSFER_TIMEOUT,
};
use uartlink_core::{
    EndpointDescriptor, InterfaceDescriptor, StandardDescriptor, TransferType, UsbConnection,
};

/// Map a transfer error onto the negative result codes
fn error_code(e: &TransferError) -> i32 {
    match e {
        // Blocking transfers are cancelled when their timeout expires
        TransferError::Cancelled => TRANSFER_TIMEOUT,
        TransferError::Stall => TRANSFER_STALL,
        TransferError::Disconnected => TRANSFER_NO_DEVICE,
        _ => TRANSFER_IO_ERROR,
    }
}

/// Split bmRequestType into nusb's control type and recipient
fn decode_request_type(request_type: u8) -> Option<(ControlType, Recipient)> {
    let control_type = match (request_type >> 5) & 0x03 {
        0 => ControlType::Standard,
        1 => ControlType::Class,
        2 => ControlType::Vendor,
        _ => return None,
    };
    let recipient = match request_type & 0x1f {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        3 => Recipient::Other,
        _ => return None,
    };
    Some((control_type, recipient))
}

fn transfer_type(t: NusbTransferType) -> TransferType {
    match t {
        NusbTransferType::Control => TransferType::Control,
        NusbTransferType::Isochronous => TransferType::Isochronous,
        NusbTransferType::Bulk => TransferType::Bulk,
        NusbTransferType::Interrupt => TransferType::Interrupt,
    }
}

/// An open device with at most one claimed interface
pub struct NusbConnection {
    device: nusb::Device,
    interface: Option<nusb::Interface>,
    bulk_in: HashMap<u8, Endpoint<Bulk, In>>,
    bulk_out: HashMap<u8, Endpoint<Bulk, Out>>,
}

impl NusbConnection {
    pub fn new(device: nusb::Device) -> Self {
        Self {
            device,
            interface: None,
            bulk_in: HashMap::new(),
            bulk_out: HashMap::new(),
        }
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> i32 {
        let Some(interface) = self.interface.as_ref() else {
            return TRANSFER_IO_ERROR;
        };
        if !self.bulk_in.contains_key(&endpoint) {
            match interface.endpoint::<Bulk, In>(endpoint) {
                Ok(ep) => {
                    self.bulk_in.insert(endpoint, ep);
                }
                Err(e) => {
                    log::warn!("Cannot open IN endpoint 0x{:02X}: {}", endpoint, e);
                    return TRANSFER_IO_ERROR;
                }
            }
        }
        let Some(ep) = self.bulk_in.get_mut(&endpoint) else {
            return TRANSFER_IO_ERROR;
        };

        // IN requests must be a whole number of packets
        let max_packet_size = ep.max_packet_size().max(1);
        let request_len = buf.len().div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        match ep.transfer_blocking(in_buf, timeout).into_result() {
            Ok(data) => {
                let received = data.len().min(buf.len());
                buf[..received].copy_from_slice(&data[..received]);
                log::trace!("USB read {} bytes from 0x{:02X}", received, endpoint);
                received as i32
            }
            Err(e) => error_code(&e),
        }
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> i32 {
        let Some(interface) = self.interface.as_ref() else {
            return TRANSFER_IO_ERROR;
        };
        if !self.bulk_out.contains_key(&endpoint) {
            match interface.endpoint::<Bulk, Out>(endpoint) {
                Ok(ep) => {
                    self.bulk_out.insert(endpoint, ep);
                }
                Err(e) => {
                    log::warn!("Cannot open OUT endpoint 0x{:02X}: {}", endpoint, e);
                    return TRANSFER_IO_ERROR;
                }
            }
        }
        let Some(ep) = self.bulk_out.get_mut(&endpoint) else {
            return TRANSFER_IO_ERROR;
        };

        let mut out_buf = Buffer::new(data.len());
        out_buf.extend_from_slice(data);
        match ep.transfer_blocking(out_buf, timeout).into_result() {
            Ok(_) => {
                log::trace!("USB write {} bytes to 0x{:02X}", data.len(), endpoint);
                data.len() as i32
            }
            Err(e) => error_code(&e),
        }
    }
}

impl UsbConnection for NusbConnection {
    fn interfaces(&self) -> Vec<InterfaceDescriptor> {
        let config = match self.device.active_configuration() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to read active configuration: {}", e);
                return Vec::new();
            }
        };
        config
            .interface_alt_settings()
            .filter(|alt| alt.alternate_setting() == 0)
            .map(|alt| InterfaceDescriptor {
                number: alt.interface_number(),
                class: alt.class(),
                endpoints: alt
                    .endpoints()
                    .map(|ep| EndpointDescriptor {
                        address: ep.address(),
                        transfer_type: transfer_type(ep.transfer_type()),
                        max_packet_size: ep.max_packet_size() as u16,
                    })
                    .collect(),
            })
            .collect()
    }

    fn raw_descriptors(&self) -> Option<Vec<u8>> {
        let desc = self.device.device_descriptor();
        let raw = StandardDescriptor {
            usb_version: desc.usb_version(),
            class: desc.class(),
            subclass: desc.subclass(),
            protocol: desc.protocol(),
            max_packet_size_0: desc.max_packet_size_0(),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            device_version: desc.device_version(),
        };
        Some(raw.to_bytes())
    }

    fn claim_interface(&mut self, interface: u8, force: bool) -> bool {
        let result = if force {
            self.device.detach_and_claim_interface(interface).wait()
        } else {
            self.device.claim_interface(interface).wait()
        };
        match result {
            Ok(claimed) => {
                self.bulk_in.clear();
                self.bulk_out.clear();
                self.interface = Some(claimed);
                true
            }
            Err(e) => {
                log::warn!("Failed to claim interface {}: {}", interface, e);
                false
            }
        }
    }

    fn bulk_transfer(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> i32 {
        if endpoint & ENDPOINT_DIR_IN != 0 {
            self.bulk_read(endpoint, buf, timeout)
        } else {
            self.bulk_write(endpoint, buf, timeout)
        }
    }

    fn control_transfer(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> i32 {
        let Some((control_type, recipient)) = decode_request_type(request_type) else {
            return TRANSFER_IO_ERROR;
        };
        let Some(interface) = self.interface.as_ref() else {
            return TRANSFER_IO_ERROR;
        };

        if request_type & ENDPOINT_DIR_IN != 0 {
            let result = interface
                .control_in(
                    ControlIn {
                        control_type,
                        recipient,
                        request,
                        value,
                        index,
                        length: buf.len() as u16,
                    },
                    timeout,
                )
                .wait();
            match result {
                Ok(data) => {
                    let received = data.len().min(buf.len());
                    buf[..received].copy_from_slice(&data[..received]);
                    received as i32
                }
                Err(e) => error_code(&e),
            }
        } else {
            let result = interface
                .control_out(
                    ControlOut {
                        control_type,
                        recipient,
                        request,
                        value,
                        index,
                        data: &*buf,
                    },
                    timeout,
                )
                .wait();
            match result {
                Ok(()) => buf.len() as i32,
                Err(e) => error_code(&e),
            }
        }
    }

    fn close(&mut self) {
        self.bulk_in.clear();
        self.bulk_out.clear();
        self.interface = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_request_type() {
        assert!(matches!(
            decode_request_type(0x40),
            Some((ControlType::Vendor, Recipient::Device))
        ));
        assert!(matches!(
            decode_request_type(0xC0),
            Some((ControlType::Vendor, Recipient::Device))
        ));
        assert!(matches!(
            decode_request_type(0x21),
            Some((ControlType::Class, Recipient::Interface))
        ));
        assert!(matches!(
            decode_request_type(0x41),
            Some((ControlType::Vendor, Recipient::Interface))
        ));
        assert!(decode_request_type(0x60).is_none());
        assert!(decode_request_type(0x45).is_none());
    }

    #[test]
    fn test_timeouts_map_to_timeout_code() {
        assert_eq!(error_code(&TransferError::Cancelled), TRANSFER_TIMEOUT);
        assert_eq!(error_code(&TransferError::Stall), TRANSFER_STALL);
        assert_eq!(error_code(&TransferError::Disconnected), TRANSFER_NO_DEVICE);
    }
}
