//! Mixer Engine (C7): per-mix gain vectors, per-cell mute, talkback
//! gating, and the float/index gain conversions used both by the wire
//! protocol and the software-config blob.

use crate::protocol::{CMD_GET_MIX, CMD_SET_MIX};
use crate::transport::Transport;
use crate::error::{Error, Result};

/// Highest valid gain index; 0 dB (unity) sits at `UNITY_INDEX`.
pub const MAX_GAIN_INDEX: u8 = 172;
pub const UNITY_INDEX: u8 = 160;

/// Talkback contribution appended to SET_MIX on devices with a talkback
/// bus: a fixed extra u16 word at unity gain (0x2000).
const TALKBACK_UNITY_WORD: u16 = 0x2000;

/// Maps a gain index in `[0, MAX_GAIN_INDEX]` to its 16-bit linear gain,
/// approximating `8192 * 10^((k - 160) / 40)`; index 0 is pinned to exact
/// silence rather than the formula's near-zero residual, matching how
/// `mix_mutes` forces index 0 onto the wire for a muted cell.
pub fn mixer_value(index: u8) -> u16 {
    if index == 0 {
        return 0;
    }
    let exponent = (index as f64 - UNITY_INDEX as f64) / 40.0;
    let gain = 8192.0_f64 * 10f64.powf(exponent);
    gain.round().clamp(0.0, 65535.0) as u16
}

/// Inverts `mixer_value` by returning the first index whose linear gain is
/// `>= value`, clamping to `MAX_GAIN_INDEX` (§4.6, invariant 3).
pub fn index_for_value(value: u16) -> u8 {
    for k in 0..=MAX_GAIN_INDEX {
        if mixer_value(k) >= value {
            return k;
        }
    }
    MAX_GAIN_INDEX
}

/// Decodes a software-config F32LE gain into a half-dB index in
/// `[0, MAX_GAIN_INDEX]`, per §4.6: silence below 0.5 linear, saturation
/// above 80.0 linear, and bias by `UNITY_INDEX` in between.
pub fn f32_gain_to_index(x: f32) -> u8 {
    let ax = x.abs();
    if ax < 0.5 {
        return 0;
    }
    if ax > 80.0 {
        return MAX_GAIN_INDEX;
    }
    let half_db = (20.0_f32 * ax.log10() * 2.0).round();
    let half_db = half_db.clamp(-(UNITY_INDEX as f32), (MAX_GAIN_INDEX - UNITY_INDEX) as f32);
    (half_db as i32 + UNITY_INDEX as i32) as u8
}

/// Encodes a gain index back into the F32LE representation used by the
/// software-config blob (the inverse of `f32_gain_to_index`, used when the
/// manager needs to write a gain the control surface changed through the
/// wire index rather than through the blob directly).
pub fn index_to_f32_gain(index: u8) -> f32 {
    if index == 0 {
        return 0.0;
    }
    let half_db = index as f32 - UNITY_INDEX as f32;
    10f32.powf(half_db / 2.0 / 20.0)
}

/// Dense N×M gain-index matrix plus its parallel mute mask. Rows are mixer
/// outputs (buses); columns are mixer inputs, matching the "per-output
/// vector is the unit of device update" rule in §4.5/§4.6.
#[derive(Clone, Debug)]
pub struct MixerMatrix {
    pub inputs: usize,
    pub outputs: usize,
    gains: Vec<Vec<u8>>,
    mutes: Vec<Vec<bool>>,
    /// Per-output talkback gate: whether this bus's trailing talkback word
    /// (on talkback-capable devices) carries unity gain or silence.
    talkback: Vec<bool>,
}

impl MixerMatrix {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            gains: vec![vec![UNITY_INDEX.min(MAX_GAIN_INDEX); inputs]; outputs],
            mutes: vec![vec![false; inputs]; outputs],
            talkback: vec![true; outputs],
        }
    }

    pub fn talkback_enabled(&self, output: usize) -> bool {
        self.talkback[output]
    }

    pub fn set_talkback_enabled(&mut self, output: usize, enabled: bool) -> Result<()> {
        if output >= self.outputs {
            return Err(Error::BadArgument("mix output index out of range"));
        }
        self.talkback[output] = enabled;
        Ok(())
    }

    pub fn gain(&self, output: usize, input: usize) -> u8 {
        self.gains[output][input]
    }

    pub fn set_gain(&mut self, output: usize, input: usize, index: u8) -> Result<()> {
        if output >= self.outputs || input >= self.inputs {
            return Err(Error::BadArgument("mixer cell index out of range"));
        }
        if index > MAX_GAIN_INDEX {
            return Err(Error::BadArgument("mixer gain index out of range"));
        }
        self.gains[output][input] = index;
        Ok(())
    }

    pub fn muted(&self, output: usize, input: usize) -> bool {
        self.mutes[output][input]
    }

    pub fn set_muted(&mut self, output: usize, input: usize, muted: bool) -> Result<()> {
        if output >= self.outputs || input >= self.inputs {
            return Err(Error::BadArgument("mixer cell index out of range"));
        }
        self.mutes[output][input] = muted;
        Ok(())
    }

    /// Builds the little-endian payload for one `SET_MIX` command: a
    /// `mix_num:u16`, then `inputs` u16 gain words, with muted cells
    /// forced to `mixer_value(0)` and, on talkback-capable devices, one
    /// trailing unity word for the talkback contribution.
    pub fn set_mix_payload(&self, output: usize, has_talkback: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 2 * (self.inputs + has_talkback as usize));
        buf.extend_from_slice(&(output as u16).to_le_bytes());
        for input in 0..self.inputs {
            let idx = if self.mutes[output][input] {
                0
            } else {
                self.gains[output][input]
            };
            buf.extend_from_slice(&mixer_value(idx).to_le_bytes());
        }
        if has_talkback {
            let word = if self.talkback[output] { TALKBACK_UNITY_WORD } else { 0 };
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decodes a `GET_MIX` response body (`inputs` little-endian u16
    /// values) into this row, inverting each through `index_for_value`.
    pub fn apply_get_mix_response(&mut self, output: usize, data: &[u8]) -> Result<()> {
        if data.len() < self.inputs * 2 {
            return Err(Error::ProtocolMismatch("GET_MIX response shorter than mix width"));
        }
        for input in 0..self.inputs {
            let raw = u16::from_le_bytes([data[input * 2], data[input * 2 + 1]]);
            self.gains[output][input] = index_for_value(raw);
            self.mutes[output][input] = false;
        }
        Ok(())
    }
}

/// Sends the current mixer row for `output` to the device.
pub fn set_mix(
    transport: &Transport,
    matrix: &MixerMatrix,
    output: usize,
    has_talkback: bool,
) -> Result<()> {
    let payload = matrix.set_mix_payload(output, has_talkback);
    transport.command(CMD_SET_MIX, &payload, 0)?;
    Ok(())
}

/// Reads back the mixer row for `output` from the device.
pub fn get_mix(transport: &Transport, matrix: &mut MixerMatrix, output: usize) -> Result<()> {
    let mut req = Vec::with_capacity(4);
    req.extend_from_slice(&(output as u16).to_le_bytes());
    req.extend_from_slice(&(matrix.inputs as u16).to_le_bytes());
    let resp = transport.command(CMD_GET_MIX, &req, matrix.inputs * 2)?;
    matrix.apply_get_mix_response(output, &resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_index_is_exact_8192() {
        assert_eq!(mixer_value(UNITY_INDEX), 8192);
    }

    #[test]
    fn max_index_matches_documented_boundary() {
        assert_eq!(mixer_value(MAX_GAIN_INDEX), 16345);
    }

    #[test]
    fn quantisation_round_trips_for_every_index() {
        for k in 0..=MAX_GAIN_INDEX {
            let v = mixer_value(k);
            assert_eq!(index_for_value(v), k, "index {k} did not round-trip");
        }
    }

    #[test]
    fn zero_index_is_silence() {
        assert_eq!(mixer_value(0), 0);
    }

    #[test]
    fn f32_gain_silence_threshold() {
        assert_eq!(f32_gain_to_index(0.0), 0);
        assert_eq!(f32_gain_to_index(0.4), 0);
    }

    #[test]
    fn f32_gain_unity_at_zero_db() {
        assert_eq!(f32_gain_to_index(1.0), UNITY_INDEX);
    }

    #[test]
    fn f32_gain_saturates_above_80() {
        assert_eq!(f32_gain_to_index(200.0), MAX_GAIN_INDEX);
    }

    #[test]
    fn set_mix_payload_encodes_mix_num_and_forces_muted_cells_silent() {
        let mut matrix = MixerMatrix::new(2, 1);
        matrix.set_gain(0, 0, UNITY_INDEX).unwrap();
        matrix.set_gain(0, 1, UNITY_INDEX).unwrap();
        matrix.set_muted(0, 1, true).unwrap();

        let payload = matrix.set_mix_payload(0, false);
        assert_eq!(&payload[0..2], &0u16.to_le_bytes());
        assert_eq!(&payload[2..4], &8192u16.to_le_bytes());
        assert_eq!(&payload[4..6], &0u16.to_le_bytes());
    }

    #[test]
    fn set_mix_payload_appends_talkback_unity_word() {
        let matrix = MixerMatrix::new(1, 1);
        let payload = matrix.set_mix_payload(0, true);
        assert_eq!(payload.len(), 2 + 2 + 2);
        assert_eq!(
            &payload[4..6],
            &TALKBACK_UNITY_WORD.to_le_bytes()
        );
    }

    #[test]
    fn talkback_disabled_sends_silent_word_instead_of_unity() {
        let mut matrix = MixerMatrix::new(1, 1);
        matrix.set_talkback_enabled(0, false).unwrap();
        let payload = matrix.set_mix_payload(0, true);
        assert_eq!(&payload[4..6], &0u16.to_le_bytes());
    }

    #[test]
    fn talkback_defaults_enabled() {
        let matrix = MixerMatrix::new(1, 1);
        assert!(matrix.talkback_enabled(0));
    }

    #[test]
    fn out_of_range_cell_is_rejected() {
        let mut matrix = MixerMatrix::new(2, 2);
        assert!(matrix.set_gain(5, 0, 10).is_err());
        assert!(matrix.set_gain(0, 0, 200).is_err());
    }
}
