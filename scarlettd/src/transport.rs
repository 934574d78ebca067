//! Transport Adapter (C4): serialises request/response pairs over the
//! vendor control endpoint, and locates the vendor interface during the
//! USB descriptor walk.
//!
//! Grounded in `input/usbhidd/src/main.rs`'s descriptor-walk-then-configure
//! pattern and `usb/xhcid/src/driver_interface.rs`'s `XhciClientHandle`,
//! here wrapped in a `spin::Mutex` critical section per §5's `usb_mutex`.

use spin::Mutex;
use usb_iface::{DeviceReqData, DevDesc, PortReqRecipient, PortReqTy, VendorClientHandle};

use crate::error::{Error, Result};
use crate::protocol::{self, Envelope, SeqCounter, ENVELOPE_LEN};

/// bRequest value for an outbound vendor command (SCARLETT_CMD_REQ).
const SCARLETT_CMD_REQ: u8 = 2;
/// bRequest value for the matching response read (SCARLETT_CMD_RESP).
const SCARLETT_CMD_RESP: u8 = 3;

/// Interface class used to locate the vendor control interface during
/// descriptor enumeration.
pub const VENDOR_INTERFACE_CLASS: u8 = 0xFF;

/// Result of walking the device descriptors to find the vendor interface.
pub struct VendorInterface {
    pub interface_num: u8,
    pub interrupt_endpoint: Option<u8>,
}

/// Locates the vendor-specific (class 0xFF) interface and, if present, its
/// interrupt-in endpoint. Descriptor enumeration beyond this point (full
/// topology, alternate settings) is out of scope; `xhcid` already performed
/// it to produce `desc`.
pub fn locate_vendor_interface(desc: &DevDesc) -> Result<VendorInterface> {
    for conf in &desc.config_descs {
        for iface in &conf.interface_descs {
            if iface.class == VENDOR_INTERFACE_CLASS {
                let interrupt_endpoint = iface
                    .endpoints
                    .iter()
                    .find(|e| e.is_interrupt() && e.direction() == usb_iface::EndpDirection::In)
                    .map(|e| e.number());
                return Ok(VendorInterface {
                    interface_num: iface.number,
                    interrupt_endpoint,
                });
            }
        }
    }
    Err(Error::NotSupported("device exposes no vendor control interface"))
}

/// Serialises the tx+rx pair of one vendor command. This is `usb_mutex`:
/// held only for the duration of a single command, never across a
/// `data_mutex`-guarded mutation.
pub struct Transport {
    handle: VendorClientHandle,
    interface_num: u16,
    seq: Mutex<SeqCounter>,
    usb_mutex: Mutex<()>,
}

impl Transport {
    pub fn new(handle: VendorClientHandle, interface_num: u8) -> Self {
        Self {
            handle,
            interface_num: interface_num as u16,
            seq: Mutex::new(SeqCounter::new()),
            usb_mutex: Mutex::new(()),
        }
    }

    pub fn handle(&self) -> &VendorClientHandle {
        &self.handle
    }

    /// Issues one command with the next sequence number and validates the
    /// response, returning its payload.
    pub fn command(&self, cmd: u32, payload: &[u8], resp_len: usize) -> Result<Vec<u8>> {
        let seq = self.seq.lock().next();
        self.command_with_seq(cmd, seq, payload, resp_len)
    }

    /// Issues INIT_1/INIT_2 with the counter forced to 1, per §4.12's
    /// "seq := 1" re-seedings. Not used for any other command.
    pub fn command_reseeded(&self, cmd: u32, payload: &[u8], resp_len: usize) -> Result<Vec<u8>> {
        let seq = self.seq.lock().reseed_to_one();
        self.command_with_seq(cmd, seq, payload, resp_len)
    }

    /// Reads `len` bytes starting at `offset` via chunked `GET_DATA`
    /// commands, each request carrying `{offset:u32, length:u16}` and
    /// returning exactly `length` bytes, per §4.11's mirror-image of the
    /// `SET_DATA` chunking rule.
    pub fn get_data(&self, offset: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for chunk in protocol::chunk_transfer(offset, len) {
            let mut req = Vec::with_capacity(6);
            req.extend_from_slice(&chunk.offset.to_le_bytes());
            req.extend_from_slice(&(chunk.len as u16).to_le_bytes());
            let resp = self.command(protocol::CMD_GET_DATA, &req, chunk.len)?;
            out.extend_from_slice(&resp);
        }
        Ok(out)
    }

    fn command_with_seq(
        &self,
        cmd: u32,
        seq: u16,
        payload: &[u8],
        resp_len: usize,
    ) -> Result<Vec<u8>> {
        let req_env = Envelope {
            cmd,
            size: payload
                .len()
                .try_into()
                .map_err(|_| Error::ResourceExhausted("request payload too large"))?,
            seq,
            error: 0,
            pad: 0,
        };

        let mut out = Vec::with_capacity(ENVELOPE_LEN + payload.len());
        out.extend_from_slice(&req_env.encode());
        out.extend_from_slice(payload);

        // A single critical section spans both the request write and the
        // matching response read: no other command may interleave.
        let _guard = self.usb_mutex.lock();

        self.handle.device_request(
            PortReqTy::Vendor,
            PortReqRecipient::Interface,
            SCARLETT_CMD_REQ,
            0,
            self.interface_num,
            DeviceReqData::Out(&out),
        )?;

        let mut in_buf = vec![0u8; ENVELOPE_LEN + resp_len];
        self.handle.device_request(
            PortReqTy::Vendor,
            PortReqRecipient::Interface,
            SCARLETT_CMD_RESP,
            0,
            self.interface_num,
            DeviceReqData::In(&mut in_buf),
        )?;

        let resp_env = Envelope::decode(&in_buf)?;
        protocol::validate_response(&req_env, &resp_env, resp_len as u16)?;

        Ok(in_buf[ENVELOPE_LEN..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usb_iface::{ConfDesc, EndpDesc, IfDesc};
    use smallvec::smallvec;

    fn desc_with(class: u8, has_interrupt: bool) -> DevDesc {
        let mut endpoints = smallvec::SmallVec::new();
        if has_interrupt {
            endpoints.push(EndpDesc {
                kind: 5,
                address: 0x85,
                attributes: 0x03,
                max_packet_size: 8,
                interval: 4,
            });
        }
        DevDesc {
            kind: 1,
            usb: 0x0200,
            class: 0,
            sub_class: 0,
            protocol: 0,
            packet_size: 64,
            vendor: 0x1235,
            product: 0x8215,
            release: 0,
            manufacturer_str: None,
            product_str: None,
            serial_str: None,
            config_descs: smallvec![ConfDesc {
                kind: 2,
                configuration_value: 1,
                configuration: None,
                attributes: 0,
                max_power: 0,
                interface_descs: smallvec![IfDesc {
                    kind: 4,
                    number: 3,
                    alternate_setting: 0,
                    class,
                    sub_class: 0,
                    protocol: 0,
                    interface_str: None,
                    endpoints,
                }],
            }],
        }
    }

    #[test]
    fn finds_vendor_interface_and_interrupt_endpoint() {
        let desc = desc_with(0xFF, true);
        let found = locate_vendor_interface(&desc).unwrap();
        assert_eq!(found.interface_num, 3);
        assert_eq!(found.interrupt_endpoint, Some(5));
    }

    #[test]
    fn missing_vendor_interface_is_not_supported() {
        let desc = desc_with(0x01, true);
        assert!(locate_vendor_interface(&desc).is_err());
    }

    #[test]
    fn vendor_interface_without_interrupt_endpoint_is_allowed() {
        let desc = desc_with(0xFF, false);
        let found = locate_vendor_interface(&desc).unwrap();
        assert_eq!(found.interrupt_endpoint, None);
    }
}
