//! Control Surface (C9): the `Control` sum type, its stable names, and the
//! get/put dispatch that ties the state mirror, routing engine, mixer
//! engine and transport together behind `data_mutex`.
//!
//! Grounded in `ac97d`'s flat list of named controls read/written through
//! one dispatch function, generalised to the Scarlett's wider control set
//! (per-channel volume, mute, HW/SW switch, preamp switches, mux, mixer).

use std::sync::Arc;

use spin::Mutex;

use crate::commit::DeferredCommit;
use crate::device_registry::{ConfigItemId, DeviceModel};
use crate::error::{Error, Result};
use crate::mixer;
use crate::ports::{self, PortType};
use crate::routing;
use crate::state::{DimMute, Staleness, StateStore};
use crate::transport::Transport;

/// Every addressable control, carrying the indices that pick out which
/// channel/cell it names (§6's "one control per named, user-facing
/// value").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Control {
    Volume(usize),
    Mute(usize),
    SwHwSwitch(usize),
    MasterVolume,
    DimMute,
    Pad(usize),
    Air(usize),
    InstLevel(usize),
    Phantom48v(usize),
    Retain48v,
    SpeakerSwitch,
    TalkbackSwitch,
    DirectMonitor,
    MsdMode,
    Mux(u16),
    MixGain(usize, usize),
    MixMute(usize, usize),
    MixTalkback(usize),
    SyncStatus,
    /// Read-only; pulled live from the device and never mirrored (§3).
    LevelMeter(usize),
    LedCustomColors,
    LedClipColor,
    LedPreClipColor,
    LedGoodColor,
    LedNCustomColor(usize),
}

/// User-facing volume bias: the device's wire scale is 0 dB at 0 and
/// descends in whole dB steps below it, while the control surface's
/// value is `0..=127` with 127 as unity; `user - 127` converts a
/// surface value onto the wire, and `clamp(raw + 127, 0, 127)` converts
/// back (§4.9).
pub fn volume_to_wire(user: u8) -> i16 {
    user as i16 - 127
}

pub fn volume_from_wire(raw: i16) -> u8 {
    (raw + 127).clamp(0, 127) as u8
}

impl Control {
    /// A stable key, independent of display name, used by the scheme
    /// front-end (§4.13) and for caching/log correlation.
    pub fn name(&self, model: &DeviceModel) -> String {
        match *self {
            Control::Volume(ch) => format!("Line {:02} Playback Volume", ch + 1),
            Control::Mute(ch) => format!("Line {:02} Mute Playback Switch", ch + 1),
            Control::SwHwSwitch(ch) => format!("Line {:02} Playback Switch", ch + 1),
            Control::MasterVolume => "Master HW Playback Volume".to_string(),
            Control::DimMute => "Dim/Mute Playback Switch".to_string(),
            Control::Pad(ch) => format!("Line {:02} Pad Capture Switch", ch + 1),
            Control::Air(ch) => format!("Line {:02} Air Capture Switch", ch + 1),
            Control::InstLevel(ch) => format!("Line {:02} Inst Capture Switch", ch + 1),
            Control::Phantom48v(ch) => format!("Line {:02} Phantom Power Capture Switch", ch + 1),
            Control::Retain48v => "Phantom Power Persistence Switch".to_string(),
            Control::SpeakerSwitch => "Speaker Switch Enum".to_string(),
            Control::TalkbackSwitch => "Talkback Switch".to_string(),
            Control::DirectMonitor => "Direct Monitor Playback Switch".to_string(),
            Control::MsdMode => "MSD Mode Switch".to_string(),
            Control::Mux(dst_wire_id) => {
                let ty = port_type_of_wire(dst_wire_id);
                let index = (dst_wire_id - ports::type_base(ty)) as usize;
                format!(
                    "{} Source Enum",
                    ports::format_port_name_remapped(ty, index, model.output_remap)
                )
            }
            Control::MixGain(out, inp) => {
                format!("Mix {} Input {:02} Playback Volume", ports::mix_letter(out), inp + 1)
            }
            Control::MixMute(out, inp) => {
                format!("Mix {} Input {:02} Mute Playback Switch", ports::mix_letter(out), inp + 1)
            }
            Control::MixTalkback(out) => format!("Mix {} Talkback", ports::mix_letter(out)),
            Control::SyncStatus => "Sync Status".to_string(),
            Control::LevelMeter(ch) => format!("Level Meter {:02}", ch + 1),
            Control::LedCustomColors => "LED Custom Colors".to_string(),
            Control::LedClipColor => "LED Clip Color".to_string(),
            Control::LedPreClipColor => "LED Pre-Clip Color".to_string(),
            Control::LedGoodColor => "LED Good Color".to_string(),
            Control::LedNCustomColor(ch) => format!("LED {} Custom Color", ch + 1),
        }
    }
}

/// Recovers a wire ID's port type by finding the greatest declared base
/// not exceeding it, since `type_base` values are assigned in increasing
/// order across `PORT_TYPE_ORDER`.
fn port_type_of_wire(wire_id: u16) -> PortType {
    let mut best = PortType::None;
    let mut best_base = 0u16;
    for &ty in &ports::PORT_TYPE_ORDER {
        let base = ports::type_base(ty);
        if ty != PortType::None && base <= wire_id && base >= best_base {
            best = ty;
            best_base = base;
        }
    }
    best
}

/// Owns the transport, model, and the `data_mutex`-guarded state mirror;
/// every `Control` get/put goes through here so lock order (`data_mutex`
/// before `usb_mutex`, never the reverse) is enforced in one place.
pub struct Device {
    pub transport: Arc<Transport>,
    pub model: &'static DeviceModel,
    pub state: Mutex<StateStore>,
    pub staleness: Arc<Staleness>,
    pub commit: DeferredCommit,
}

impl Device {
    /// Lazy refresh (§4.4/§4.10): a `get` first clears whichever staleness
    /// flags the last interrupt raised and re-reads the matching state
    /// from the device before returning the mirrored value. A failed
    /// refresh is logged and falls through to the last-good mirror value
    /// (§7's "a failed refresh during a get returns the last-good mirror
    /// value").
    fn refresh_stale(&self) {
        if self.staleness.take_sync() {
            let mut state = self.state.lock();
            if let Err(err) = crate::refresh::refresh_sync(&self.transport, &mut state) {
                log::warn!("sync status refresh failed: {err}");
            }
        }
        if self.staleness.take_volume() {
            let mut state = self.state.lock();
            if let Err(err) = crate::refresh::refresh_volumes(&self.transport, self.model, &mut state) {
                log::warn!("volume refresh failed: {err}");
            }
        }
        if self.staleness.take_line_ctl() {
            let mut state = self.state.lock();
            if let Err(err) = crate::refresh::refresh_line_controls(&self.transport, self.model, &mut state) {
                log::warn!("line control refresh failed: {err}");
            }
        }
        if self.staleness.take_speaker() {
            let mut state = self.state.lock();
            if let Err(err) = crate::refresh::refresh_speaker_state(&self.transport, self.model, &mut state) {
                log::warn!("speaker state refresh failed: {err}");
            }
        }
    }

    pub fn get(&self, control: Control) -> Result<i64> {
        // Meters are pulled on demand and never mirrored (§3): no stale
        // flag gates them and no lock guards them beyond the transport's
        // own usb_mutex.
        if let Control::LevelMeter(idx) = control {
            return self.read_meter(idx);
        }
        self.refresh_stale();
        let state = self.state.lock();
        self.read_locked(&state, control)
    }

    /// The read side of every mirrored control, shared by `get` and by
    /// `put`'s old-value comparison (§4.4's "read old from mirror; if
    /// equal, return unchanged").
    fn read_locked(&self, state: &StateStore, control: Control) -> Result<i64> {
        match control {
            Control::Volume(ch) => Ok(state
                .volumes
                .get(ch)
                .map(|v| v.volume as i64)
                .ok_or(Error::BadArgument("channel index out of range"))?),
            Control::Mute(ch) => Ok(state
                .volumes
                .get(ch)
                .map(|v| v.mute as i64)
                .ok_or(Error::BadArgument("channel index out of range"))?),
            Control::SwHwSwitch(ch) => Ok(state
                .volumes
                .get(ch)
                .map(|v| v.sw_hw_switch as i64)
                .ok_or(Error::BadArgument("channel index out of range"))?),
            Control::MasterVolume => Ok(state.master_volume as i64),
            Control::DimMute => Ok(state.dim_mute.to_wire_byte() as i64),
            Control::Pad(ch) => bool_field(&state.preamp.pad, ch),
            Control::Air(ch) => bool_field(&state.preamp.air, ch),
            Control::InstLevel(ch) => bool_field(&state.preamp.inst_level, ch),
            Control::Phantom48v(ch) => bool_field(&state.preamp.phantom_48v, ch),
            Control::Retain48v => Ok(state.retain_48v as i64),
            Control::SpeakerSwitch => Ok(state.speaker_switch as i64),
            Control::TalkbackSwitch => Ok(state.talkback_switch as i64),
            Control::DirectMonitor => Ok(state.direct_monitor as i64),
            Control::MsdMode => Ok(state.msd_mode as i64),
            Control::Mux(dst_wire_id) => {
                let dst_idx = ports::try_index_of(
                    &self.model.ports.output,
                    ports::SampleRateBand::Default,
                    dst_wire_id,
                )?;
                match state.mux[dst_idx] {
                    Some(src_idx) => Ok(routing::source_wire_id(self.model, src_idx) as i64),
                    None => Ok(-1),
                }
            }
            Control::MixGain(out, inp) => Ok(state.mixer.gain(out, inp) as i64),
            Control::MixMute(out, inp) => Ok(state.mixer.muted(out, inp) as i64),
            Control::MixTalkback(out) => Ok(state.mixer.talkback_enabled(out) as i64),
            Control::SyncStatus => Ok(state.sync_status as i64),
            Control::LevelMeter(_) => Err(Error::NotSupported("level meters are not mirrored")),
            Control::LedCustomColors => Ok(state.led_custom_colors as i64),
            Control::LedClipColor => Ok(state.led_clip_color as i64),
            Control::LedPreClipColor => Ok(state.led_pre_clip_color as i64),
            Control::LedGoodColor => Ok(state.led_good_color as i64),
            Control::LedNCustomColor(ch) => bool_field(&state.led_n_custom_color, ch),
        }
    }

    /// Live, uncached read of one 12-bit peak meter via `CMD_GET_METER_LEVELS`.
    fn read_meter(&self, idx: usize) -> Result<i64> {
        if idx >= self.model.meter_count {
            return Err(Error::BadArgument("meter index out of range"));
        }
        let mut req = Vec::with_capacity(4);
        req.extend_from_slice(&(idx as u16).to_le_bytes());
        req.extend_from_slice(&1u16.to_le_bytes());
        let resp = self.transport.command(crate::protocol::CMD_GET_METER_LEVELS, &req, 2)?;
        Ok(u16::from_le_bytes([resp[0], resp[1]]) as i64)
    }

    /// Applies `value`, mutating the mirror and issuing the matching
    /// wire command(s) while `usb_mutex` (inside `Transport`) is held,
    /// then arms the deferred commit timer for persistence-bearing
    /// controls (§4.11).
    pub fn put(&self, control: Control, value: i64) -> Result<()> {
        if matches!(control, Control::LevelMeter(_)) {
            return Err(Error::NotSupported("level meters are read-only"));
        }
        if matches!(control, Control::SyncStatus) {
            return Err(Error::NotSupported("sync status is read-only"));
        }

        let mut state = self.state.lock();
        if self.read_locked(&state, control).ok() == Some(value) {
            return Ok(());
        }
        match control {
            Control::Volume(ch) => {
                let item = self.model.config_item(ConfigItemId::AnalogueVolume);
                let ch_state = state
                    .volumes
                    .get_mut(ch)
                    .ok_or(Error::BadArgument("channel index out of range"))?;
                let user = value.clamp(0, 127) as u8;
                ch_state.volume = user;
                if ch_state.sw_hw_switch {
                    ch_state.sw_shadow = Some(user);
                }
                let wire = volume_to_wire(user);
                let payload = (wire as u16).to_le_bytes();
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset_of(ch), &payload),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::Mute(ch) => {
                let item = self.model.config_item(ConfigItemId::AnalogueMute);
                let ch_state = state
                    .volumes
                    .get_mut(ch)
                    .ok_or(Error::BadArgument("channel index out of range"))?;
                ch_state.mute = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset_of(ch), &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::SwHwSwitch(ch) => {
                let item = self.model.config_item(ConfigItemId::AnalogueSwHw);
                let ch_state = state
                    .volumes
                    .get_mut(ch)
                    .ok_or(Error::BadArgument("channel index out of range"))?;
                let switching_to_sw = value != 0 && !ch_state.sw_hw_switch;
                let switching_to_hw = value == 0 && ch_state.sw_hw_switch;
                if switching_to_sw {
                    if let Some(shadow) = ch_state.sw_shadow {
                        ch_state.volume = shadow;
                    }
                }
                if switching_to_hw {
                    ch_state.sw_shadow = Some(ch_state.volume);
                }
                ch_state.sw_hw_switch = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset_of(ch), &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::MasterVolume => {
                let item = self.model.config_item(ConfigItemId::MasterVolume);
                state.master_volume = value.clamp(0, 127) as u8;
                let wire = volume_to_wire(state.master_volume);
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &(wire as u16).to_le_bytes()),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::DimMute => {
                let item = self.model.config_item(ConfigItemId::DimMute);
                state.dim_mute = DimMute::from_wire_byte(value as u8);
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::Pad(ch) => self.put_preamp_bool(&mut state.preamp.pad, ch, value, ConfigItemId::Pad),
            Control::Air(ch) => self.put_preamp_bool(&mut state.preamp.air, ch, value, ConfigItemId::Air),
            Control::InstLevel(ch) => {
                self.put_preamp_bool(&mut state.preamp.inst_level, ch, value, ConfigItemId::InstLevel)
            }
            Control::Phantom48v(ch) => {
                self.put_preamp_bool(&mut state.preamp.phantom_48v, ch, value, ConfigItemId::Phantom48v)
            }
            Control::Retain48v => {
                let item = self.model.config_item(ConfigItemId::Retain48v);
                state.retain_48v = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::SpeakerSwitch => {
                let item = self.model.config_item(ConfigItemId::SpeakerSwitch);
                state.speaker_switch = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::TalkbackSwitch => {
                if !self.model.has_talkback {
                    return Err(Error::NotSupported("device has no talkback bus"));
                }
                let item = self.model.config_item(ConfigItemId::TalkbackSwitch);
                state.talkback_switch = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::DirectMonitor => {
                if !self.model.has_direct_monitor {
                    return Err(Error::NotSupported("device has no direct monitor switch"));
                }
                let item = self.model.config_item(ConfigItemId::DirectMonitor);
                state.direct_monitor = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::MsdMode => {
                if !self.model.has_msd {
                    return Err(Error::NotSupported("device has no mass-storage mode"));
                }
                let item = self.model.config_item(ConfigItemId::MsdMode);
                state.msd_mode = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::Mux(dst_wire_id) => {
                let src_wire_id = if value < 0 { 0 } else { value as u16 };
                routing::route(self.model, &mut state, dst_wire_id, src_wire_id)?;
                routing::set_mux_all_bands(&self.transport, self.model, &state)?;
                self.commit.arm();
                Ok(())
            }
            Control::MixGain(out, inp) => {
                state.mixer.set_gain(out, inp, value.clamp(0, mixer::MAX_GAIN_INDEX as i64) as u8)?;
                mixer::set_mix(&self.transport, &state.mixer, out, self.model.has_talkback)?;
                self.commit.arm();
                Ok(())
            }
            Control::MixMute(out, inp) => {
                state.mixer.set_muted(out, inp, value != 0)?;
                mixer::set_mix(&self.transport, &state.mixer, out, self.model.has_talkback)?;
                self.commit.arm();
                Ok(())
            }
            Control::MixTalkback(out) => {
                if !self.model.has_talkback {
                    return Err(Error::NotSupported("device has no talkback bus"));
                }
                state.mixer.set_talkback_enabled(out, value != 0)?;
                mixer::set_mix(&self.transport, &state.mixer, out, self.model.has_talkback)?;
                self.commit.arm();
                Ok(())
            }
            Control::LedCustomColors => {
                let item = self.model.config_item(ConfigItemId::LedCustomColors);
                state.led_custom_colors = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::LedClipColor => {
                let item = self.model.config_item(ConfigItemId::LedClipColor);
                state.led_clip_color = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::LedPreClipColor => {
                let item = self.model.config_item(ConfigItemId::LedPreClipColor);
                state.led_pre_clip_color = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::LedGoodColor => {
                let item = self.model.config_item(ConfigItemId::LedGoodColor);
                state.led_good_color = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset, &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::LedNCustomColor(ch) => {
                let item = self.model.config_item(ConfigItemId::LedNCustomColor);
                let slot = state
                    .led_n_custom_color
                    .get_mut(ch)
                    .ok_or(Error::BadArgument("channel index out of range"))?;
                *slot = value != 0;
                self.transport.command(
                    crate::protocol::CMD_SET_DATA,
                    &encode_set_data(item.offset_of(ch), &[value as u8]),
                    0,
                )?;
                self.activate(item.activate)?;
                self.commit.arm();
                Ok(())
            }
            Control::SyncStatus | Control::LevelMeter(_) => unreachable!("rejected above"),
        }
    }

    fn put_preamp_bool(
        &self,
        field: &mut [bool],
        ch: usize,
        value: i64,
        id: ConfigItemId,
    ) -> Result<()> {
        let slot = field.get_mut(ch).ok_or(Error::BadArgument("channel index out of range"))?;
        *slot = value != 0;
        let item = self.model.config_item(id);
        self.transport.command(
            crate::protocol::CMD_SET_DATA,
            &encode_set_data(item.offset_of(ch), &[value as u8]),
            0,
        )?;
        self.activate(item.activate)?;
        self.commit.arm();
        Ok(())
    }

    /// Issues the `DATA_CMD` activation word naming which config item
    /// group just changed, per §4.11.
    fn activate(&self, activate: u32) -> Result<()> {
        self.transport
            .command(crate::protocol::CMD_DATA_CMD, &activate.to_le_bytes(), 0)?;
        Ok(())
    }
}

fn bool_field(field: &[bool], ch: usize) -> Result<i64> {
    field
        .get(ch)
        .map(|b| *b as i64)
        .ok_or(Error::BadArgument("channel index out of range"))
}

fn encode_set_data(offset: u32, value: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + value.len());
    payload.extend_from_slice(&offset.to_le_bytes());
    payload.extend_from_slice(value);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_bias_round_trips_at_unity() {
        assert_eq!(volume_to_wire(127), 0);
        assert_eq!(volume_from_wire(0), 127);
    }

    #[test]
    fn volume_from_wire_clamps_out_of_range() {
        assert_eq!(volume_from_wire(-200), 0);
        assert_eq!(volume_from_wire(200), 127);
    }

    #[test]
    fn control_names_are_stable_and_distinct() {
        use crate::device_registry::DEVICES;
        let model = DEVICES.iter().find(|m| m.name == "Scarlett 18i20 G3").unwrap();
        assert_eq!(Control::Volume(0).name(model), "Line 01 Playback Volume");
        assert_eq!(Control::MasterVolume.name(model), "Master HW Playback Volume");
        assert_ne!(Control::Volume(0).name(model), Control::Volume(1).name(model));
    }

    #[test]
    fn newly_added_controls_have_distinct_stable_names() {
        use crate::device_registry::DEVICES;
        let model = DEVICES.iter().find(|m| m.name == "Scarlett 18i20 G3").unwrap();
        assert_eq!(Control::SyncStatus.name(model), "Sync Status");
        assert_eq!(Control::LevelMeter(0).name(model), "Level Meter 01");
        assert_ne!(Control::LevelMeter(0).name(model), Control::LevelMeter(1).name(model));
        assert_eq!(Control::MixTalkback(0).name(model), "Mix A Talkback");
        assert_eq!(Control::LedCustomColors.name(model), "LED Custom Colors");
        assert_eq!(Control::LedClipColor.name(model), "LED Clip Color");
        assert_eq!(Control::LedPreClipColor.name(model), "LED Pre-Clip Color");
        assert_eq!(Control::LedGoodColor.name(model), "LED Good Color");
        assert_eq!(Control::LedNCustomColor(0).name(model), "LED 1 Custom Color");
    }
}
