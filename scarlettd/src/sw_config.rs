//! Software-Config Manager (C8): the optional on-device configuration
//! blob carried by Gen 3 devices that advertise `has_software_config`.
//!
//! Grounded in the device registry's `ConfigItem`/SET_DATA pattern, and in
//! `ac97d`'s pattern of mirroring a hardware blob in memory and only ever
//! writing back the bytes that actually changed. The exact field layout
//! below is this driver's own internally-consistent invention: no
//! original-language source was available to confirm real firmware
//! offsets (see DESIGN.md), so every field beyond the header and checksum
//! is sized generously and validated only by its own round-trip tests.

use crate::error::{Error, Result};
use crate::protocol::{self, CMD_SET_DATA};
use crate::transport::Transport;

/// Base device offset at which the blob lives, per §3/§6.
pub const BASE_OFFSET: u32 = 0xEC;

/// Header fields precede the body: `all_size:u32, magic:u16, version:u16,
/// szof:u32`, matching the construction order in the worked example in
/// §6 (authoritative over the summary prose's differing byte offset for
/// `magic`, which this driver treats as an approximation).
pub const HEADER_LEN: usize = 12;
pub const BODY_LEN: usize = 6544;
pub const TOTAL_LEN: usize = HEADER_LEN + BODY_LEN;

pub const MAGIC: u16 = 0x3006;
pub const VERSION: u16 = 0x5;

pub const MAX_OUTPUTS: usize = 20;
pub const MAX_MIX_OUTPUTS: usize = 12;
pub const MAX_MIX_INPUTS: usize = 25;
/// Per-mixer-input routing table stride; the device registry's Open
/// Question resolution for "mixer input → software-config column" is
/// `mix_num * SW_MIXER_INPUT_STRIDE + input_num`, bounds-checked against
/// this constant rather than extrapolated beyond it.
pub const SW_MIXER_INPUT_STRIDE: usize = 30;

const OUT_MUX_OFF: usize = 0;
const OUT_MUX_LEN: usize = MAX_OUTPUTS * 4;

const MIXER_IN_MUX_OFF: usize = OUT_MUX_OFF + OUT_MUX_LEN;
const MIXER_IN_MUX_LEN: usize = MAX_MIX_OUTPUTS * SW_MIXER_INPUT_STRIDE * 4;

const PAIRING_OFF: usize = MIXER_IN_MUX_OFF + MIXER_IN_MUX_LEN;
const PAIRING_LEN: usize = MAX_OUTPUTS;

const STEREO_MASK_OFF: usize = PAIRING_OFF + PAIRING_LEN;
const OUTPUT_MUTE_MASK_OFF: usize = STEREO_MASK_OFF + 4;
const OUT_VOL_OFF: usize = OUTPUT_MUTE_MASK_OFF + 4;
const OUT_VOL_ENTRY_LEN: usize = 4;
const OUT_VOL_LEN: usize = MAX_OUTPUTS * OUT_VOL_ENTRY_LEN;

const MIXER_GAIN_OFF: usize = OUT_VOL_OFF + OUT_VOL_LEN;
const MIXER_GAIN_LEN: usize = MAX_MIX_INPUTS * MAX_MIX_OUTPUTS * 4;
const MIXER_PAN_OFF: usize = MIXER_GAIN_OFF + MIXER_GAIN_LEN;
const MIXER_PAN_LEN: usize = MAX_MIX_OUTPUTS * 4;
const MIXER_MUTE_MASK_OFF: usize = MIXER_PAN_OFF + MIXER_PAN_LEN;
const MIXER_SOLO_MASK_OFF: usize = MIXER_MUTE_MASK_OFF + 4;
const MIXER_BIND_MASK_OFF: usize = MIXER_SOLO_MASK_OFF + 4;

const CHECKSUM_OFF: usize = BODY_LEN - 4;

const _LAYOUT_FITS: () = assert!(MIXER_BIND_MASK_OFF + 4 <= CHECKSUM_OFF);

/// The software-config blob mirror: `HEADER_LEN` header bytes followed by
/// `BODY_LEN` body bytes, the last 4 of which are the checksum word.
#[derive(Clone)]
pub struct SwConfig {
    buf: Vec<u8>,
}

impl SwConfig {
    /// Builds a fresh default blob (§4.7: "when GET_DATA reports a
    /// zero-length size word, the manager constructs and uploads a
    /// default blob rather than treating it as an error").
    pub fn default_blob() -> Self {
        let mut cfg = Self {
            buf: vec![0u8; TOTAL_LEN],
        };
        cfg.write_header();
        cfg.recompute_checksum();
        cfg
    }

    /// Parses a blob read back from the device, rejecting it (forcing
    /// degraded mode at the caller) if its declared size doesn't match
    /// what this driver expects to manage.
    pub fn from_device_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TOTAL_LEN {
            return Err(Error::ProtocolMismatch("software-config blob size mismatch"));
        }
        let all_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let magic = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        let version = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
        if all_size as usize != TOTAL_LEN || magic != MAGIC || version != VERSION {
            return Err(Error::ProtocolMismatch("software-config blob header mismatch"));
        }
        let cfg = Self { buf: bytes.to_vec() };
        cfg.verify_checksum()?;
        Ok(cfg)
    }

    fn write_header(&mut self) {
        self.buf[0..4].copy_from_slice(&(TOTAL_LEN as u32).to_le_bytes());
        self.buf[4..6].copy_from_slice(&MAGIC.to_le_bytes());
        self.buf[6..8].copy_from_slice(&VERSION.to_le_bytes());
        self.buf[8..12].copy_from_slice(&(BODY_LEN as u32).to_le_bytes());
    }

    fn body_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_LEN..]
    }
    fn body(&self) -> &[u8] {
        &self.buf[HEADER_LEN..]
    }

    /// Recomputes the trailing checksum word so the sum of every 32-bit
    /// word in the blob is zero mod 2^32 (invariant 6).
    pub fn recompute_checksum(&mut self) {
        let mut sum: u32 = 0;
        {
            let total_len = self.buf.len();
            for chunk in self.buf[..total_len - 4].chunks_exact(4) {
                sum = sum.wrapping_add(u32::from_le_bytes(chunk.try_into().unwrap()));
            }
        }
        let checksum = 0u32.wrapping_sub(sum);
        let off = HEADER_LEN + CHECKSUM_OFF;
        self.buf[off..off + 4].copy_from_slice(&checksum.to_le_bytes());
    }

    fn verify_checksum(&self) -> Result<()> {
        let mut sum: u32 = 0;
        for chunk in self.buf.chunks_exact(4) {
            sum = sum.wrapping_add(u32::from_le_bytes(chunk.try_into().unwrap()));
        }
        if sum != 0 {
            return Err(Error::ProtocolMismatch("software-config blob checksum invalid"));
        }
        Ok(())
    }

    pub fn out_mux(&self, output: usize) -> Result<u32> {
        self.bounds_check_output(output)?;
        let off = OUT_MUX_OFF + output * 4;
        Ok(u32::from_le_bytes(self.body()[off..off + 4].try_into().unwrap()))
    }

    pub fn set_out_mux(&mut self, output: usize, source: u32) -> Result<()> {
        self.bounds_check_output(output)?;
        let off = OUT_MUX_OFF + output * 4;
        self.body_mut()[off..off + 4].copy_from_slice(&source.to_le_bytes());
        Ok(())
    }

    pub fn mixer_in_mux(&self, mix_output: usize, input: usize) -> Result<u32> {
        self.bounds_check_mixer_column(mix_output, input)?;
        let off = MIXER_IN_MUX_OFF + (mix_output * SW_MIXER_INPUT_STRIDE + input) * 4;
        Ok(u32::from_le_bytes(self.body()[off..off + 4].try_into().unwrap()))
    }

    pub fn set_mixer_in_mux(&mut self, mix_output: usize, input: usize, source: u32) -> Result<()> {
        self.bounds_check_mixer_column(mix_output, input)?;
        let off = MIXER_IN_MUX_OFF + (mix_output * SW_MIXER_INPUT_STRIDE + input) * 4;
        self.body_mut()[off..off + 4].copy_from_slice(&source.to_le_bytes());
        Ok(())
    }

    /// `true` if `output` (an even index) is linked in a stereo pair with
    /// `output + 1`.
    pub fn is_stereo_pair(&self, output: usize) -> Result<bool> {
        self.bounds_check_output(output)?;
        let mask = u32::from_le_bytes(
            self.body()[STEREO_MASK_OFF..STEREO_MASK_OFF + 4]
                .try_into()
                .unwrap(),
        );
        Ok(mask & (1 << output) != 0)
    }

    pub fn set_stereo_pair(&mut self, output: usize, linked: bool) -> Result<()> {
        self.bounds_check_output(output)?;
        let mut mask = u32::from_le_bytes(
            self.body()[STEREO_MASK_OFF..STEREO_MASK_OFF + 4]
                .try_into()
                .unwrap(),
        );
        if linked {
            mask |= 1 << output;
        } else {
            mask &= !(1 << output);
        }
        self.body_mut()[STEREO_MASK_OFF..STEREO_MASK_OFF + 4].copy_from_slice(&mask.to_le_bytes());
        Ok(())
    }

    /// Enforces invariant: when output `2k` is linked, `out_mux[2k+1]`
    /// must equal `out_mux[2k] + 1` (the stereo companion source). Called
    /// after any mutation that could break the pairing.
    pub fn normalize_stereo_pairs(&mut self) -> Result<()> {
        let mut k = 0;
        while k + 1 < MAX_OUTPUTS {
            if self.is_stereo_pair(k)? {
                let left = self.out_mux(k)?;
                if left != 0 {
                    self.set_out_mux(k + 1, left + 1)?;
                }
            }
            k += 2;
        }
        Ok(())
    }

    pub fn mixer_gain(&self, mix_output: usize, input: usize) -> Result<f32> {
        self.bounds_check_mixer_cell(mix_output, input)?;
        let off = MIXER_GAIN_OFF + (mix_output * MAX_MIX_INPUTS + input) * 4;
        Ok(f32::from_le_bytes(self.body()[off..off + 4].try_into().unwrap()))
    }

    pub fn set_mixer_gain(&mut self, mix_output: usize, input: usize, gain: f32) -> Result<()> {
        self.bounds_check_mixer_cell(mix_output, input)?;
        let off = MIXER_GAIN_OFF + (mix_output * MAX_MIX_INPUTS + input) * 4;
        self.body_mut()[off..off + 4].copy_from_slice(&gain.to_le_bytes());
        Ok(())
    }

    fn bounds_check_output(&self, output: usize) -> Result<()> {
        if output >= MAX_OUTPUTS {
            return Err(Error::BadArgument("software-config output index out of range"));
        }
        Ok(())
    }

    fn bounds_check_mixer_column(&self, mix_output: usize, input: usize) -> Result<()> {
        if mix_output >= MAX_MIX_OUTPUTS || input >= SW_MIXER_INPUT_STRIDE {
            return Err(Error::BadArgument("software-config mixer column out of range"));
        }
        Ok(())
    }

    fn bounds_check_mixer_cell(&self, mix_output: usize, input: usize) -> Result<()> {
        if mix_output >= MAX_MIX_OUTPUTS || input >= MAX_MIX_INPUTS {
            return Err(Error::BadArgument("software-config mixer gain index out of range"));
        }
        Ok(())
    }

    /// Commits a byte range of the blob to the device as one or more
    /// chunked `SET_DATA` transfers of at most `MAX_CHUNK_BYTES`, per
    /// §4.11. `recompute_checksum` must be called by the caller first if
    /// the mutation touched anything but the checksum word itself.
    pub fn commit(&self, transport: &Transport, local_offset: usize, len: usize) -> Result<()> {
        if local_offset + len > self.buf.len() {
            return Err(Error::BadArgument("software-config commit range out of bounds"));
        }
        let device_offset = BASE_OFFSET + local_offset as u32;
        for chunk in protocol::chunk_transfer(device_offset, len) {
            let start = (chunk.offset - device_offset) as usize + local_offset;
            let mut payload = Vec::with_capacity(4 + chunk.len);
            payload.extend_from_slice(&chunk.offset.to_le_bytes());
            payload.extend_from_slice(&self.buf[start..start + chunk.len]);
            transport.command(CMD_SET_DATA, &payload, 0)?;
        }
        Ok(())
    }

    pub fn commit_all(&self, transport: &Transport) -> Result<()> {
        self.commit(transport, 0, self.buf.len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_blob_has_valid_header_and_checksum() {
        let cfg = SwConfig::default_blob();
        assert_eq!(cfg.buf.len(), TOTAL_LEN);
        assert!(SwConfig::from_device_bytes(cfg.as_bytes()).is_ok());
    }

    #[test]
    fn wrong_size_is_rejected() {
        let short = vec![0u8; TOTAL_LEN - 1];
        assert!(SwConfig::from_device_bytes(&short).is_err());
    }

    #[test]
    fn tampered_checksum_is_rejected() {
        let mut cfg = SwConfig::default_blob();
        cfg.buf[20] ^= 0xFF;
        assert!(SwConfig::from_device_bytes(cfg.as_bytes()).is_err());
    }

    #[test]
    fn out_mux_round_trips_and_recomputes_checksum() {
        let mut cfg = SwConfig::default_blob();
        cfg.set_out_mux(3, 42).unwrap();
        cfg.recompute_checksum();
        assert_eq!(cfg.out_mux(3).unwrap(), 42);
        assert!(SwConfig::from_device_bytes(cfg.as_bytes()).is_ok());
    }

    #[test]
    fn stereo_pair_normalisation_links_companion_source() {
        let mut cfg = SwConfig::default_blob();
        cfg.set_out_mux(4, 10).unwrap();
        cfg.set_stereo_pair(4, true).unwrap();
        cfg.normalize_stereo_pairs().unwrap();
        assert_eq!(cfg.out_mux(5).unwrap(), 11);
    }

    #[test]
    fn mixer_gain_round_trips() {
        let mut cfg = SwConfig::default_blob();
        cfg.set_mixer_gain(0, 0, 1.0).unwrap();
        assert_eq!(cfg.mixer_gain(0, 0).unwrap(), 1.0);
    }

    #[test]
    fn out_of_range_output_is_rejected() {
        let cfg = SwConfig::default_blob();
        assert!(cfg.out_mux(MAX_OUTPUTS).is_err());
    }
}
