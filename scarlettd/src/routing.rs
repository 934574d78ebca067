//! Routing Engine (C6): GET_MUX/SET_MUX framing and the mute-aware,
//! stereo-pair-consistent assembly of the on-device mux table from the
//! in-memory mirror.
//!
//! Grounded in `usbhubd`'s port-topology walk (ordered emission built from
//! a fixed per-type scan) and in the device registry's `mux_dest_order`.

use crate::device_registry::{DeviceModel, MuxBand, MUX_BANDS};
use crate::error::{Error, Result};
use crate::ports::{self, PortType};
use crate::protocol::{CMD_GET_MUX, CMD_SET_MUX};
use crate::state::StateStore;
use crate::transport::Transport;

/// One 24-bit-in-32-bit mux entry: `dst | (src << 12)`.
fn pack_entry(dst_wire_id: u16, src_wire_id: u16) -> u32 {
    (dst_wire_id as u32) | ((src_wire_id as u32) << 12)
}

fn unpack_entry(entry: u32) -> (u16, u16) {
    ((entry & 0xFFF) as u16, ((entry >> 12) & 0xFFF) as u16)
}

/// Number of mux entries carried in one band's wire table: every declared
/// destination port at that band.
pub fn mux_size(model: &DeviceModel, band: MuxBand) -> usize {
    ports::total_count(&model.ports.output, band.sample_band())
}

/// Reads the `Low`-band mux table (GET_MUX only ever targets band 0, per
/// §4.5) and stores it into the canonical mirror, muted outputs included
/// (forcing a muted destination's source to `None`/off is a routing-time
/// concern, not a read-time one).
pub fn get_mux(transport: &Transport, model: &DeviceModel, state: &mut StateStore) -> Result<()> {
    let count = mux_size(model, MuxBand::Low);
    let mut req = Vec::with_capacity(4);
    req.extend_from_slice(&0u16.to_le_bytes());
    req.extend_from_slice(&(count as u16).to_le_bytes());
    let resp = transport.command(CMD_GET_MUX, &req, count * 4)?;
    if resp.len() < count * 4 {
        return Err(Error::ProtocolMismatch("GET_MUX response shorter than requested count"));
    }

    state.mux = vec![None; count];
    for i in 0..count {
        let raw = u32::from_le_bytes(resp[i * 4..i * 4 + 4].try_into().unwrap());
        let (_dst, src) = unpack_entry(raw);
        if src == 0 {
            continue;
        }
        if let Some(src_idx) = ports::index_of(&model.ports.input, ports::SampleRateBand::Default, src) {
            state.mux[i] = Some(src_idx);
        }
    }
    Ok(())
}

/// Builds and sends the `band`'s SET_MUX payload from the canonical
/// mirror, walking `model.mux_dest_order` to lay out destinations in the
/// order the device expects, truncating per-type at `band`'s (possibly
/// smaller) port counts and zero-padding the tail up to `mux_size(band)`.
pub fn set_mux(
    transport: &Transport,
    model: &DeviceModel,
    state: &StateStore,
    band: MuxBand,
) -> Result<()> {
    let sample_band = band.sample_band();
    let total = mux_size(model, band);
    let mut entries = Vec::with_capacity(total);

    for &ty in model.mux_dest_order {
        let count = model.ports.output.counts(ty).count(sample_band);
        for idx in 0..count {
            let dst_wire = ports::wire_id_of(ty, idx);
            let canonical_idx = ports::flatten(&model.ports.output, ports::SampleRateBand::Default, ty, idx);
            let src_wire = state
                .mux
                .get(canonical_idx)
                .copied()
                .flatten()
                .map(|src_idx| source_wire_id(model, src_idx))
                .unwrap_or(0);
            entries.push(pack_entry(dst_wire, src_wire));
        }
    }
    entries.resize(total, pack_entry(0, 0));

    let mut payload = Vec::with_capacity(4 + entries.len() * 4);
    payload.extend_from_slice(&(band.index() as u16).to_le_bytes());
    payload.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for e in &entries {
        payload.extend_from_slice(&e.to_le_bytes());
    }
    transport.command(CMD_SET_MUX, &payload, 0)?;
    Ok(())
}

/// Sends all three bands' tables; §4.5 requires SET_MUX to touch every
/// band even though the mirror itself is one canonical table.
pub fn set_mux_all_bands(transport: &Transport, model: &DeviceModel, state: &StateStore) -> Result<()> {
    for &band in &MUX_BANDS {
        set_mux(transport, model, state, band)?;
    }
    Ok(())
}

pub(crate) fn source_wire_id(model: &DeviceModel, canonical_src_idx: usize) -> u16 {
    let mut remaining = canonical_src_idx;
    for &ty in &ports::PORT_TYPE_ORDER {
        let count = model
            .ports
            .input
            .counts(ty)
            .count(ports::SampleRateBand::Default);
        if remaining < count {
            return ports::wire_id_of(ty, remaining);
        }
        remaining -= count;
    }
    0
}

/// Routes `dst_wire_id` to `src_wire_id` in the canonical mirror,
/// validating both against the device's declared port tables; the caller
/// is responsible for re-issuing SET_MUX for every band afterwards.
pub fn route(
    model: &DeviceModel,
    state: &mut StateStore,
    dst_wire_id: u16,
    src_wire_id: u16,
) -> Result<()> {
    let dst_idx = ports::try_index_of(&model.ports.output, ports::SampleRateBand::Default, dst_wire_id)?;
    if src_wire_id == 0 {
        state.mux[dst_idx] = None;
        return Ok(());
    }
    let src_idx = ports::try_index_of(&model.ports.input, ports::SampleRateBand::Default, src_wire_id)?;
    state.mux[dst_idx] = Some(src_idx);
    Ok(())
}

/// Forces a destination's routed source off without touching the mirror's
/// would-be reconnection point, so unmuting restores the prior routing
/// (§4.8's mute-aware routing rule): callers keep the original source in
/// a shadow table and only clear it from `state.mux` while muted.
pub fn apply_mute(state: &mut StateStore, dst_idx: usize, muted: bool, shadow: &mut Option<usize>) {
    if muted {
        if state.mux[dst_idx].is_some() {
            *shadow = state.mux[dst_idx];
            state.mux[dst_idx] = None;
        }
    } else if let Some(src) = shadow.take() {
        state.mux[dst_idx] = Some(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_registry::DEVICES;

    fn model() -> &'static DeviceModel {
        DEVICES.iter().find(|m| m.name == "Scarlett 18i20 G3").unwrap()
    }

    #[test]
    fn route_and_unroute_round_trip() {
        let m = model();
        let mut state = StateStore::new(m);
        let dst = ports::wire_id_of(PortType::Analogue, 0);
        let src = ports::wire_id_of(PortType::Pcm, 2);
        route(m, &mut state, dst, src).unwrap();
        let dst_idx = ports::flatten(&m.ports.output, ports::SampleRateBand::Default, PortType::Analogue, 0);
        let src_idx = ports::flatten(&m.ports.input, ports::SampleRateBand::Default, PortType::Pcm, 2);
        assert_eq!(state.mux[dst_idx], Some(src_idx));

        route(m, &mut state, dst, 0).unwrap();
        assert_eq!(state.mux[dst_idx], None);
    }

    #[test]
    fn unknown_destination_is_rejected() {
        let m = model();
        let mut state = StateStore::new(m);
        assert!(route(m, &mut state, 0x0FFF, 0x0081).is_err());
    }

    #[test]
    fn mute_then_unmute_restores_routing_via_shadow() {
        let m = model();
        let mut state = StateStore::new(m);
        let dst = ports::wire_id_of(PortType::Analogue, 0);
        let src = ports::wire_id_of(PortType::Pcm, 2);
        route(m, &mut state, dst, src).unwrap();
        let dst_idx = ports::flatten(&m.ports.output, ports::SampleRateBand::Default, PortType::Analogue, 0);

        let mut shadow = None;
        apply_mute(&mut state, dst_idx, true, &mut shadow);
        assert_eq!(state.mux[dst_idx], None);
        apply_mute(&mut state, dst_idx, false, &mut shadow);
        assert!(state.mux[dst_idx].is_some());
    }

    #[test]
    fn mux_size_shrinks_with_adat_at_high_bandwidth() {
        let m = model();
        assert!(mux_size(m, MuxBand::High) <= mux_size(m, MuxBand::Low));
    }
}
