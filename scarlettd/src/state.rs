//! State Store (C5): the in-memory authoritative mirror of on-device
//! state, guarded by `data_mutex`, plus the lock-free staleness flags the
//! notification loop raises without ever taking that mutex (§5).
//!
//! Grounded in `ac97d`'s single `Mixer` struct holding the full device
//! state behind one lock, extended with the Scarlett-specific mirrors
//! (mux table, mixer matrix, software-config blob) named in §3.

use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

use crate::device_registry::DeviceModel;
use crate::mixer::MixerMatrix;
use crate::sw_config::SwConfig;

bitflags! {
    /// Wire layout of the dim/mute config item's single byte.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DimMuteBits: u8 {
        const MUTE = 0b01;
        const DIM  = 0b10;
    }
}

/// Per-output dim/mute pair (§3: "a single dim+mute pair shared by every
/// analogue output", scenario-testable as one on-device item).
#[derive(Clone, Copy, Debug, Default)]
pub struct DimMute {
    pub dim: bool,
    pub mute: bool,
}

impl DimMute {
    pub fn to_wire_byte(self) -> u8 {
        let mut bits = DimMuteBits::empty();
        bits.set(DimMuteBits::DIM, self.dim);
        bits.set(DimMuteBits::MUTE, self.mute);
        bits.bits()
    }

    pub fn from_wire_byte(raw: u8) -> Self {
        let bits = DimMuteBits::from_bits_truncate(raw);
        Self {
            dim: bits.contains(DimMuteBits::DIM),
            mute: bits.contains(DimMuteBits::MUTE),
        }
    }
}

/// Per-channel preamp switches on analogue inputs. Whether these are
/// transferred as one byte per channel or packed into a single bitmask
/// byte is a per-model detail (`LineCtlPacking`) handled entirely in
/// `routing`/`control`; the mirror itself is always one bool per channel.
#[derive(Clone, Debug, Default)]
pub struct PreampSwitches {
    pub pad: Vec<bool>,
    pub air: Vec<bool>,
    pub inst_level: Vec<bool>,
    pub phantom_48v: Vec<bool>,
}

impl PreampSwitches {
    fn new(channels: usize) -> Self {
        Self {
            pad: vec![false; channels],
            air: vec![false; channels],
            inst_level: vec![false; channels],
            phantom_48v: vec![false; channels],
        }
    }
}

/// Per-output analogue volume state: a HW/SW access-mode switch, a mute,
/// and the volume itself on the user-facing 0..127 scale (§4.9's bias
/// convention is applied at the control surface, not here).
#[derive(Clone, Copy, Debug)]
pub struct VolumeChannel {
    pub volume: u8,
    pub sw_hw_switch: bool,
    pub mute: bool,
    /// Volume last held while in SW mode, restored when flipping HW→SW
    /// (invariant 8); `None` until the channel has been in SW mode once.
    pub sw_shadow: Option<u8>,
}

impl Default for VolumeChannel {
    fn default() -> Self {
        Self {
            volume: 127,
            sw_hw_switch: false,
            mute: false,
            sw_shadow: None,
        }
    }
}

/// The full device mirror, guarded by one `data_mutex` (§5: "data_mutex
/// serialises access to the in-memory state mirror"; lock order is always
/// data_mutex before usb_mutex, never the reverse).
pub struct StateStore {
    /// Canonical mux table at the `Low` band's port counts; `Mid`/`High`
    /// emission truncates per-type as routing.rs projects it onto each
    /// band's smaller port counts (ADAT shrinks at high sample rates).
    pub mux: Vec<Option<usize>>,
    pub mixer: MixerMatrix,
    pub volumes: Vec<VolumeChannel>,
    pub master_volume: u8,
    pub dim_mute: DimMute,
    pub preamp: PreampSwitches,
    pub retain_48v: bool,
    pub speaker_switch: bool,
    pub talkback_switch: bool,
    pub direct_monitor: bool,
    pub msd_mode: bool,
    /// `None` until a successful `GET_DATA` read establishes the blob, or
    /// if a size mismatch forced the driver into degraded mode (§4.7).
    pub sw_config: Option<SwConfig>,
    /// Mirrors `CMD_GET_SYNC`'s last-read result; refreshed lazily off the
    /// `sync` staleness flag like the other refresh-on-demand mirrors.
    pub sync_status: bool,
    pub led_custom_colors: bool,
    pub led_clip_color: bool,
    pub led_pre_clip_color: bool,
    pub led_good_color: bool,
    pub led_n_custom_color: Vec<bool>,
}

impl StateStore {
    pub fn new(model: &DeviceModel) -> Self {
        use crate::ports::SampleRateBand;

        let mux_len = crate::ports::total_count(&model.ports.output, SampleRateBand::Default);
        let analogue_out = model
            .ports
            .output
            .analogue
            .count(SampleRateBand::Default);
        let analogue_in = model.ports.input.analogue.count(SampleRateBand::Default);

        Self {
            mux: vec![None; mux_len],
            mixer: MixerMatrix::new(model.mix_inputs, model.mix_outputs),
            volumes: vec![VolumeChannel::default(); analogue_out],
            master_volume: 127,
            dim_mute: DimMute::default(),
            preamp: PreampSwitches::new(analogue_in),
            retain_48v: false,
            speaker_switch: false,
            talkback_switch: false,
            direct_monitor: false,
            msd_mode: false,
            sw_config: None,
            sync_status: false,
            led_custom_colors: false,
            led_clip_color: false,
            led_pre_clip_color: false,
            led_good_color: false,
            led_n_custom_color: vec![false; analogue_out],
        }
    }
}

/// Lock-free staleness flags (§4.8): the notification loop sets these
/// directly from interrupt context without acquiring `data_mutex` or
/// `usb_mutex`; a flag is cleared only by the next successful bulk read of
/// the state it covers, never by the notification loop itself.
#[derive(Default)]
pub struct Staleness {
    pub sync: AtomicBool,
    pub volume: AtomicBool,
    pub line_ctl: AtomicBool,
    pub speaker: AtomicBool,
}

impl Staleness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_sync(&self) {
        self.sync.store(true, Ordering::Relaxed);
    }
    pub fn mark_volume(&self) {
        self.volume.store(true, Ordering::Relaxed);
    }
    pub fn mark_line_ctl(&self) {
        self.line_ctl.store(true, Ordering::Relaxed);
    }
    pub fn mark_speaker(&self) {
        self.speaker.store(true, Ordering::Relaxed);
    }

    pub fn take_sync(&self) -> bool {
        self.sync.swap(false, Ordering::Relaxed)
    }
    pub fn take_volume(&self) -> bool {
        self.volume.swap(false, Ordering::Relaxed)
    }
    pub fn take_line_ctl(&self) -> bool {
        self.line_ctl.swap(false, Ordering::Relaxed)
    }
    pub fn take_speaker(&self) -> bool {
        self.speaker.swap(false, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_registry::DEVICES;

    #[test]
    fn new_state_sizes_mirrors_from_model() {
        let model = DEVICES.iter().find(|m| m.name == "Scarlett 18i20 G3").unwrap();
        let state = StateStore::new(model);
        assert_eq!(state.volumes.len(), 10);
        assert_eq!(state.mixer.inputs, 25);
        assert_eq!(state.mixer.outputs, 12);
        assert_eq!(state.preamp.pad.len(), 10);
    }

    #[test]
    fn staleness_flags_set_and_clear_independently() {
        let s = Staleness::new();
        s.mark_volume();
        s.mark_sync();
        assert!(s.take_volume());
        assert!(!s.take_volume());
        assert!(s.take_sync());
    }

    #[test]
    fn dim_mute_wire_byte_round_trips() {
        let dm = DimMute { dim: true, mute: false };
        assert_eq!(DimMute::from_wire_byte(dm.to_wire_byte()).dim, true);
        let raw = 0b11u8;
        let decoded = DimMute::from_wire_byte(raw);
        assert!(decoded.dim && decoded.mute);
    }

    #[test]
    fn volume_channel_defaults_to_unity_and_hw_mode() {
        let ch = VolumeChannel::default();
        assert_eq!(ch.volume, 127);
        assert!(!ch.sw_hw_switch);
        assert!(ch.sw_shadow.is_none());
    }
}
