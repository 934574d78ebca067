//! Protocol Codec (C3): the vendor request/response envelope, sequencing,
//! validation, and the 1024-byte bulk chunking rule.
//!
//! Grounded in `usb/xhcid/src/driver_interface.rs`'s `PortReq`/envelope
//! value types, translated from JSON-over-IPC framing to the raw
//! little-endian byte layout the Scarlett vendor interface actually uses.

use crate::error::{Error, Result};

pub const CMD_INIT_1: u32 = 0x0000_0000;
pub const CMD_INIT_2: u32 = 0x0000_0002;
pub const CMD_CONFIG_SAVE: u32 = 0x0000_0006;
pub const CMD_GET_METER_LEVELS: u32 = 0x0000_1001;
pub const CMD_GET_MIX: u32 = 0x0000_2001;
pub const CMD_SET_MIX: u32 = 0x0000_2002;
pub const CMD_GET_MUX: u32 = 0x0000_3001;
pub const CMD_SET_MUX: u32 = 0x0000_3002;
pub const CMD_GET_SYNC: u32 = 0x0000_6004;
pub const CMD_GET_DATA: u32 = 0x0080_0000;
pub const CMD_SET_DATA: u32 = 0x0080_0001;
pub const CMD_DATA_CMD: u32 = 0x0080_0002;

/// Any single bulk GET_DATA/SET_DATA transfer is capped at this many
/// payload bytes; larger transfers are issued as consecutive chunks.
pub const MAX_CHUNK_BYTES: usize = 1024;

pub const ENVELOPE_LEN: usize = 16;

/// The 16-byte little-endian envelope header shared by every vendor
/// request and response.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Envelope {
    pub cmd: u32,
    pub size: u16,
    pub seq: u16,
    pub error: u32,
    pub pad: u32,
}

impl Envelope {
    pub fn encode(&self) -> [u8; ENVELOPE_LEN] {
        let mut buf = [0u8; ENVELOPE_LEN];
        buf[0..4].copy_from_slice(&self.cmd.to_le_bytes());
        buf[4..6].copy_from_slice(&self.size.to_le_bytes());
        buf[6..8].copy_from_slice(&self.seq.to_le_bytes());
        buf[8..12].copy_from_slice(&self.error.to_le_bytes());
        buf[12..16].copy_from_slice(&self.pad.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENVELOPE_LEN {
            return Err(Error::ProtocolMismatch("response shorter than envelope"));
        }
        Ok(Self {
            cmd: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            size: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            seq: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            error: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            pad: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

/// Monotone request sequence counter. Wraps freely; the only place a
/// mismatch is tolerated is the documented INIT exception (§4.2).
#[derive(Debug, Default)]
pub struct SeqCounter(u16);

impl SeqCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// Post-increment: returns the sequence number to use for the next
    /// request, then advances the counter.
    pub fn next(&mut self) -> u16 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    /// Reseeds the counter so the *current* request carries seq = 1, as the
    /// init sequence does twice (§4.12). Returns 1 for convenience at call
    /// sites that build the request envelope immediately afterwards.
    pub fn reseed_to_one(&mut self) -> u16 {
        self.0 = 1;
        1
    }
}

/// Validates a decoded response envelope against the request that produced
/// it, honouring the one documented INIT exception where `req.seq == 1`
/// may be echoed back as `resp.seq == 0`.
pub fn validate_response(req: &Envelope, resp: &Envelope, expected_size: u16) -> Result<()> {
    if resp.cmd != req.cmd {
        return Err(Error::ProtocolMismatch("response cmd does not match request"));
    }
    let seq_ok = resp.seq == req.seq || (req.seq == 1 && resp.seq == 0);
    if !seq_ok {
        return Err(Error::ProtocolMismatch("response seq does not match request"));
    }
    if resp.size != expected_size {
        return Err(Error::ProtocolMismatch("response size does not match declared size"));
    }
    if resp.error != 0 {
        return Err(Error::ProtocolMismatch("response carries a nonzero error word"));
    }
    if resp.pad != 0 {
        return Err(Error::ProtocolMismatch("response carries a nonzero pad word"));
    }
    Ok(())
}

/// One (offset, len) slice of a bulk transfer, each at most
/// `MAX_CHUNK_BYTES` bytes, per the chunking rule in §4.2.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Chunk {
    pub offset: u32,
    pub len: usize,
}

/// Splits a `(offset, total_len)` bulk transfer into chunks of at most
/// `MAX_CHUNK_BYTES` bytes.
pub fn chunk_transfer(offset: u32, total_len: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut remaining = total_len;
    let mut off = offset;
    while remaining > 0 {
        let len = remaining.min(MAX_CHUNK_BYTES);
        chunks.push(Chunk { offset: off, len });
        remaining -= len;
        off += len as u32;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_bytes() {
        let env = Envelope {
            cmd: CMD_SET_MUX,
            size: 12,
            seq: 7,
            error: 0,
            pad: 0,
        };
        let bytes = env.encode();
        assert_eq!(bytes.len(), ENVELOPE_LEN);
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn validate_accepts_matching_response() {
        let req = Envelope { cmd: CMD_GET_MUX, size: 4, seq: 5, error: 0, pad: 0 };
        let resp = Envelope { cmd: CMD_GET_MUX, size: 8, seq: 5, error: 0, pad: 0 };
        assert!(validate_response(&req, &resp, 8).is_ok());
    }

    #[test]
    fn validate_accepts_init_seq_exception() {
        let req = Envelope { cmd: CMD_INIT_2, size: 0, seq: 1, error: 0, pad: 0 };
        let resp = Envelope { cmd: CMD_INIT_2, size: 84, seq: 0, error: 0, pad: 0 };
        assert!(validate_response(&req, &resp, 84).is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_seq_outside_init() {
        let req = Envelope { cmd: CMD_GET_MUX, size: 4, seq: 5, error: 0, pad: 0 };
        let resp = Envelope { cmd: CMD_GET_MUX, size: 4, seq: 6, error: 0, pad: 0 };
        assert!(validate_response(&req, &resp, 4).is_err());
    }

    #[test]
    fn validate_rejects_nonzero_error() {
        let req = Envelope { cmd: CMD_GET_MUX, size: 4, seq: 1, error: 0, pad: 0 };
        let resp = Envelope { cmd: CMD_GET_MUX, size: 4, seq: 1, error: 1, pad: 0 };
        assert!(validate_response(&req, &resp, 4).is_err());
    }

    #[test]
    fn chunking_splits_at_1024_bytes() {
        let chunks = chunk_transfer(0x100, 2049);
        assert_eq!(
            chunks,
            vec![
                Chunk { offset: 0x100, len: 1024 },
                Chunk { offset: 0x100 + 1024, len: 1024 },
                Chunk { offset: 0x100 + 2048, len: 1 },
            ]
        );
    }

    #[test]
    fn chunking_of_exact_multiple_has_no_remainder_chunk() {
        let chunks = chunk_transfer(0, 2048);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len, 1024);
    }
}
