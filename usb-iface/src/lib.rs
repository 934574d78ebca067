//! Host-controller abstraction consumed by `scarlettd`.
//!
//! This crate is the single-device slice of the workspace's USB client
//! handle: synchronous control transfers plus a blocking interrupt-endpoint
//! reader. The full transfer-ring / topology machinery (enumeration, DMA,
//! hub management) lives one layer down, in the host controller driver that
//! opens these scheme paths on our behalf, and is out of scope here.

use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::{io, result, str};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DevDesc {
    pub kind: u8,
    pub usb: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub packet_size: u8,
    pub vendor: u16,
    pub product: u16,
    pub release: u16,
    pub manufacturer_str: Option<String>,
    pub product_str: Option<String>,
    pub serial_str: Option<String>,
    pub config_descs: SmallVec<[ConfDesc; 1]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfDesc {
    pub kind: u8,
    pub configuration_value: u8,
    pub configuration: Option<String>,
    pub attributes: u8,
    pub max_power: u8,
    pub interface_descs: SmallVec<[IfDesc; 1]>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IfDesc {
    pub kind: u8,
    pub number: u8,
    pub alternate_setting: u8,
    /// Interface class. The vendor-specific Scarlett control interface is
    /// located by `class == 0xFF`.
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub interface_str: Option<String>,
    pub endpoints: SmallVec<[EndpDesc; 4]>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EndpDesc {
    pub kind: u8,
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

const ENDP_ATTR_TY_MASK: u8 = 0x03;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpointTy {
    Ctrl,
    Isoch,
    Bulk,
    Interrupt,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpDirection {
    Out,
    In,
    Bidirectional,
}

impl EndpDesc {
    pub fn ty(self) -> EndpointTy {
        match self.attributes & ENDP_ATTR_TY_MASK {
            0 => EndpointTy::Ctrl,
            1 => EndpointTy::Isoch,
            2 => EndpointTy::Bulk,
            3 => EndpointTy::Interrupt,
            _ => unreachable!(),
        }
    }
    pub fn is_control(&self) -> bool {
        self.ty() == EndpointTy::Ctrl
    }
    pub fn is_interrupt(&self) -> bool {
        self.ty() == EndpointTy::Interrupt
    }
    pub fn direction(&self) -> EndpDirection {
        if self.is_control() {
            return EndpDirection::Bidirectional;
        }
        if self.address & 0x80 != 0 {
            EndpDirection::In
        } else {
            EndpDirection::Out
        }
    }
    /// Endpoint number as addressed through the scheme path, i.e. stripped
    /// of the direction bit.
    pub fn number(&self) -> u8 {
        self.address & 0x7F
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum PortReqDirection {
    HostToDevice,
    DeviceToHost,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum PortReqTy {
    Class,
    Vendor,
    Standard,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum PortReqRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PortReq {
    pub direction: PortReqDirection,
    pub req_type: PortReqTy,
    pub req_recipient: PortReqRecipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
    pub transfers_data: bool,
}

pub enum DeviceReqData<'a> {
    In(&'a mut [u8]),
    Out(&'a [u8]),
    NoData,
}

impl DeviceReqData<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::In(buf) => buf.len(),
            Self::Out(buf) => buf.len(),
            Self::NoData => 0,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn direction(&self) -> PortReqDirection {
        match self {
            DeviceReqData::Out(_) => PortReqDirection::HostToDevice,
            DeviceReqData::NoData => PortReqDirection::HostToDevice,
            DeviceReqData::In(_) => PortReqDirection::DeviceToHost,
        }
    }
}

#[derive(Debug, Error)]
pub struct Invalid(pub &'static str);

impl fmt::Display for Invalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid response: {}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum UsbIfaceError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidResponse(#[from] Invalid),

    #[error("transfer buffer too large ({0} > 65536)")]
    TransferBufTooLarge(usize),
}

/// A handle to a single USB device's vendor control interface, opened
/// through a host-controller scheme of the form `/scheme/<scheme>/port<id>/...`.
#[derive(Debug)]
pub struct VendorClientHandle {
    scheme: String,
    port: String,
}

impl VendorClientHandle {
    pub fn new(scheme: String, port: String) -> Self {
        Self { scheme, port }
    }

    pub fn get_standard_descs(&self) -> result::Result<DevDesc, UsbIfaceError> {
        let path = format!("/scheme/{}/port{}/descriptors", self.scheme, self.port);
        let json = std::fs::read(path)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Issues one control transfer and blocks until it completes. This is
    /// the synchronous half of the abstraction assumed by the spec: tx and
    /// rx for a single request happen back-to-back with no interleaving.
    pub fn device_request<'a>(
        &self,
        req_type: PortReqTy,
        req_recipient: PortReqRecipient,
        request: u8,
        value: u16,
        index: u16,
        data: DeviceReqData<'a>,
    ) -> result::Result<(), UsbIfaceError> {
        let length = u16::try_from(data.len())
            .map_err(|_| UsbIfaceError::TransferBufTooLarge(data.len()))?;

        let req = PortReq {
            direction: data.direction(),
            req_type,
            req_recipient,
            request,
            value,
            index,
            length,
            transfers_data: !matches!(data, DeviceReqData::NoData),
        };
        let json = serde_json::to_vec(&req)?;

        let path = format!("/scheme/{}/port{}/request", self.scheme, self.port);
        let mut file = File::open(path)?;

        let json_bytes_written = file.write(&json)?;
        if json_bytes_written != json.len() {
            return Err(Invalid("device_request didn't accept the whole setup packet").into());
        }

        match data {
            DeviceReqData::In(buf) => {
                let bytes_read = file.read(buf)?;
                if bytes_read != buf.len() {
                    return Err(Invalid("device_request returned a short IN transfer").into());
                }
            }
            DeviceReqData::Out(buf) => {
                let bytes_written = file.write(buf)?;
                if bytes_written != buf.len() {
                    return Err(Invalid("device_request accepted a short OUT transfer").into());
                }
            }
            DeviceReqData::NoData => (),
        }
        Ok(())
    }

    pub fn open_endpoint(&self, num: u8) -> result::Result<VendorEndpHandle, UsbIfaceError> {
        let ctl_path = format!(
            "/scheme/{}/port{}/endpoints/{}/ctl",
            self.scheme, self.port, num
        );
        let data_path = format!(
            "/scheme/{}/port{}/endpoints/{}/data",
            self.scheme, self.port, num
        );
        Ok(VendorEndpHandle {
            ctl: File::open(ctl_path)?,
            data: File::open(data_path)?,
        })
    }
}

/// A single non-control endpoint, used here for the interrupt-in
/// notification pipe.
#[derive(Debug)]
pub struct VendorEndpHandle {
    ctl: File,
    data: File,
}

impl VendorEndpHandle {
    /// Blocking read of exactly `buf.len()` bytes, or a short-packet error.
    /// This stands in for asynchronous interrupt-pipe submission: a
    /// dedicated reader thread calls this in a loop (see
    /// `scarlettd::notify`).
    pub fn transfer_read(&mut self, buf: &mut [u8]) -> result::Result<usize, UsbIfaceError> {
        let _ = &mut self.ctl; // status/reset path omitted: unused by this driver
        let bytes_read = self.data.read(buf)?;
        Ok(bytes_read)
    }
}

impl str::FromStr for PortReqTy {
    type Err = Invalid;
    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        Ok(match s {
            "class" => Self::Class,
            "vendor" => Self::Vendor,
            "standard" => Self::Standard,
            _ => return Err(Invalid("unknown request type")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_direction_and_type_decode() {
        let ep = EndpDesc {
            kind: 5,
            address: 0x83,
            attributes: 0x03,
            max_packet_size: 8,
            interval: 4,
        };
        assert_eq!(ep.ty(), EndpointTy::Interrupt);
        assert_eq!(ep.direction(), EndpDirection::In);
        assert_eq!(ep.number(), 3);
    }

    #[test]
    fn control_endpoint_is_bidirectional() {
        let ep = EndpDesc {
            kind: 5,
            address: 0x00,
            attributes: 0x00,
            max_packet_size: 64,
            interval: 0,
        };
        assert_eq!(ep.direction(), EndpDirection::Bidirectional);
    }
}
