//! Refresh procedures (§4.10): the read side of the config-item table
//! that `control::Device::put` writes through, invoked when the
//! notification loop has marked a region of the mirror stale.
//!
//! Grounded in the same `ConfigItem{offset,size,stride,count}` table the
//! writer uses (`device_registry.rs`), so there is exactly one source of
//! truth for where each item lives on the wire; the spec's "single
//! combined ~136-byte volume-status read" is folded into one
//! `GET_DATA`-per-item pass instead of a second, hand-derived offset
//! layout (documented as a simplification in DESIGN.md).

use crate::control::volume_from_wire;
use crate::device_registry::{ConfigItemId, DeviceModel};
use crate::error::Result;
use crate::protocol::CMD_GET_SYNC;
use crate::state::{DimMute, StateStore};
use crate::transport::Transport;

fn read_u8(transport: &Transport, offset: u32) -> Result<u8> {
    let bytes = transport.get_data(offset, 1)?;
    Ok(bytes.first().copied().unwrap_or(0))
}

fn read_i16(transport: &Transport, offset: u32) -> Result<i16> {
    let bytes = transport.get_data(offset, 2)?;
    Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_bools(transport: &Transport, offset: u32, count: usize) -> Result<Vec<bool>> {
    let bytes = transport.get_data(offset, count)?;
    Ok(bytes.iter().map(|&b| b != 0).collect())
}

/// Re-reads master volume, dim/mute, and every analogue output's
/// volume/mute/sw-hw-switch triple, applying the HW-tracks-master rule
/// (§4.10): an output in HW mode mirrors `master_volume`/`dim_mute.mute`
/// rather than its own stored software volume.
pub fn refresh_volumes(transport: &Transport, model: &DeviceModel, state: &mut StateStore) -> Result<()> {
    let master_item = model.config_item(ConfigItemId::MasterVolume);
    let master_raw = read_i16(transport, master_item.offset)?;
    state.master_volume = volume_from_wire(master_raw);

    let dim_item = model.config_item(ConfigItemId::DimMute);
    let dim_raw = read_u8(transport, dim_item.offset)?;
    state.dim_mute = DimMute::from_wire_byte(dim_raw);

    let vol_item = model.config_item(ConfigItemId::AnalogueVolume);
    let mute_item = model.config_item(ConfigItemId::AnalogueMute);
    let sw_hw_item = model.config_item(ConfigItemId::AnalogueSwHw);

    for (ch, channel) in state.volumes.iter_mut().enumerate() {
        channel.sw_hw_switch = read_u8(transport, sw_hw_item.offset_of(ch))? != 0;
        if channel.sw_hw_switch {
            channel.volume = state.master_volume;
            channel.mute = state.dim_mute.mute;
        } else {
            let raw = read_i16(transport, vol_item.offset_of(ch))?;
            channel.volume = volume_from_wire(raw);
            channel.sw_shadow = Some(channel.volume);
            channel.mute = read_u8(transport, mute_item.offset_of(ch))? != 0;
        }
    }
    Ok(())
}

/// Re-reads the preamp switch banks (pad/air/inst-level/48V), one byte
/// per declared input channel per §4.10.
pub fn refresh_line_controls(transport: &Transport, model: &DeviceModel, state: &mut StateStore) -> Result<()> {
    let pad_item = model.config_item(ConfigItemId::Pad);
    let air_item = model.config_item(ConfigItemId::Air);
    let inst_item = model.config_item(ConfigItemId::InstLevel);
    let v48_item = model.config_item(ConfigItemId::Phantom48v);

    state.preamp.pad = read_bools(transport, pad_item.offset, state.preamp.pad.len())?;
    state.preamp.air = read_bools(transport, air_item.offset, state.preamp.air.len())?;
    state.preamp.inst_level = read_bools(transport, inst_item.offset, state.preamp.inst_level.len())?;
    state.preamp.phantom_48v = read_bools(transport, v48_item.offset, state.preamp.phantom_48v.len())?;
    Ok(())
}

/// Re-reads speaker switching/talkback/direct-monitor state (§4.10):
/// `speaker = enable ? (sw & 1) + 1 : 0`, `talkback = (sw >> 1) & 1`.
pub fn refresh_speaker_state(transport: &Transport, model: &DeviceModel, state: &mut StateStore) -> Result<()> {
    let speaker_item = model.config_item(ConfigItemId::SpeakerSwitch);
    let enable = read_u8(transport, speaker_item.offset)?;
    let talkback_item = model.config_item(ConfigItemId::TalkbackSwitch);
    let sw = read_u8(transport, talkback_item.offset)?;

    state.speaker_switch = enable != 0 && sw & 1 != 0;
    if model.has_talkback {
        state.talkback_switch = (sw >> 1) & 1 != 0;
    }
    if model.has_direct_monitor {
        let dm_item = model.config_item(ConfigItemId::DirectMonitor);
        state.direct_monitor = read_u8(transport, dm_item.offset)? != 0;
    }
    Ok(())
}

/// Re-reads clock sync status via `CMD_GET_SYNC`. Not one of the three
/// bulk-read procedures named in §4.10 (it has no config-item offset of
/// its own); driven off the `sync` staleness flag the same way.
pub fn refresh_sync(transport: &Transport, state: &mut StateStore) -> Result<()> {
    let resp = transport.command(CMD_GET_SYNC, &[], 4)?;
    let raw = u32::from_le_bytes([resp[0], resp[1], resp[2], resp[3]]);
    state.sync_status = raw != 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_i16_decodes_little_endian_two_byte_value() {
        let bytes: [u8; 2] = (-5i16).to_le_bytes();
        assert_eq!(i16::from_le_bytes(bytes), -5);
    }
}
