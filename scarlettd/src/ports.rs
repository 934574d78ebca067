//! Port algebra (C2): bidirectional mapping between (port-type, index,
//! direction) and 12-bit wire IDs, and flat per-direction enumeration.
//!
//! Grounded in `usb/xhcid/src/driver_interface.rs`'s `PortId`/`EndpDesc`
//! style of small `Copy` value types with associated conversions, adapted
//! to the Scarlett wire format rather than USB topology.

use crate::error::{Error, Result};

/// A mux source is an input-direction port: a physical input jack, a PCM
/// playback stream from the host, or a mixer bus output routed onward.
/// A mux destination is an output-direction port: a physical output jack,
/// a PCM capture stream to the host, or a mixer input slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum PortType {
    None,
    Analogue,
    Spdif,
    Adat,
    Adat2,
    Mix,
    Pcm,
    InternalMic,
    Talkback,
}

/// Fixed scan order used by `index_of`/`flatten`/`format_port_name` and by
/// the default mux-assignment builder.
pub const PORT_TYPE_ORDER: [PortType; 9] = [
    PortType::None,
    PortType::Analogue,
    PortType::Spdif,
    PortType::Adat,
    PortType::Adat2,
    PortType::Mix,
    PortType::Pcm,
    PortType::InternalMic,
    PortType::Talkback,
];

/// Per-type base offset or-ed with the in-type index to produce a wire ID.
pub fn type_base(ty: PortType) -> u16 {
    match ty {
        PortType::None => 0x000,
        PortType::Analogue => 0x080,
        PortType::Spdif => 0x180,
        PortType::Adat => 0x200,
        PortType::Adat2 => 0x280,
        PortType::Mix => 0x300,
        PortType::Pcm => 0x600,
        PortType::InternalMic => 0x700,
        PortType::Talkback => 0x780,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SampleRateBand {
    Default,
    Br44_48,
    Br88_96,
    Br176_192,
}

pub const ALL_BANDS: [SampleRateBand; 4] = [
    SampleRateBand::Default,
    SampleRateBand::Br44_48,
    SampleRateBand::Br88_96,
    SampleRateBand::Br176_192,
];

impl SampleRateBand {
    pub fn index(self) -> usize {
        match self {
            SampleRateBand::Default => 0,
            SampleRateBand::Br44_48 => 1,
            SampleRateBand::Br88_96 => 2,
            SampleRateBand::Br176_192 => 3,
        }
    }
}

/// Per-type port counts across the four sample-rate bands.
#[derive(Clone, Copy, Debug, Default)]
pub struct BandCounts(pub [u8; 4]);

impl BandCounts {
    pub const fn flat(n: u8) -> Self {
        Self([n, n, n, n])
    }
    pub fn count(&self, band: SampleRateBand) -> usize {
        self.0[band.index()] as usize
    }
}

/// Port counts for one direction, indexed by `PortType`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectionPorts {
    pub none: BandCounts,
    pub analogue: BandCounts,
    pub spdif: BandCounts,
    pub adat: BandCounts,
    pub adat2: BandCounts,
    pub mix: BandCounts,
    pub pcm: BandCounts,
    pub internal_mic: BandCounts,
    pub talkback: BandCounts,
}

impl DirectionPorts {
    pub fn counts(&self, ty: PortType) -> BandCounts {
        match ty {
            PortType::None => self.none,
            PortType::Analogue => self.analogue,
            PortType::Spdif => self.spdif,
            PortType::Adat => self.adat,
            PortType::Adat2 => self.adat2,
            PortType::Mix => self.mix,
            PortType::Pcm => self.pcm,
            PortType::InternalMic => self.internal_mic,
            PortType::Talkback => self.talkback,
        }
    }
}

/// `wire_id_of(type, index) -> u16`.
pub fn wire_id_of(ty: PortType, index: usize) -> u16 {
    type_base(ty) | (index as u16)
}

/// `index_of(direction, wire_id) -> Option<usize>`: flat index over the
/// declared ports of `direction` at `band`, or `None` for an unknown wire
/// ID (including the all-zero "Off" ID).
pub fn index_of(
    ports: &DirectionPorts,
    band: SampleRateBand,
    wire_id: u16,
) -> Option<usize> {
    if wire_id == 0 {
        return None;
    }
    let mut base_flat = 0usize;
    for &ty in PORT_TYPE_ORDER.iter() {
        let count = ports.counts(ty).count(band);
        let base = type_base(ty);
        if count > 0 && wire_id >= base && (wire_id as usize) < base as usize + count {
            return Some(base_flat + (wire_id - base) as usize);
        }
        base_flat += count;
    }
    None
}

/// `flatten(direction, type, index) -> usize`: sum of counts over
/// preceding types (in `PORT_TYPE_ORDER`) plus `index`.
pub fn flatten(ports: &DirectionPorts, band: SampleRateBand, ty: PortType, index: usize) -> usize {
    let mut base_flat = 0usize;
    for &t in PORT_TYPE_ORDER.iter() {
        if t == ty {
            return base_flat + index;
        }
        base_flat += ports.counts(t).count(band);
    }
    unreachable!("PORT_TYPE_ORDER covers every PortType variant")
}

/// Total number of declared ports of `direction` at `band`.
pub fn total_count(ports: &DirectionPorts, band: SampleRateBand) -> usize {
    PORT_TYPE_ORDER
        .iter()
        .map(|&t| ports.counts(t).count(band))
        .sum()
}

/// Formats a printf-style default name for `(type, index)`; callers apply
/// device-specific overrides (remapping, descriptive suffixes) before or
/// after calling this.
pub fn format_port_name(ty: PortType, index: usize) -> String {
    match ty {
        PortType::None => "Off".to_string(),
        PortType::Analogue => format!("Analogue {}", index + 1),
        PortType::Spdif => format!("S/PDIF {}", index + 1),
        PortType::Adat => format!("ADAT {}", index + 1),
        PortType::Adat2 => format!("ADAT2 {}", index + 1),
        PortType::Mix => format!("Mix {}", mix_letter(index)),
        PortType::Pcm => format!("PCM {}", index + 1),
        PortType::InternalMic => "Internal Mic".to_string(),
        PortType::Talkback => "Talkback".to_string(),
    }
}

/// Mixer buses are named with letters A..Y (spec allows up to 25).
pub fn mix_letter(index: usize) -> char {
    (b'A' + index as u8) as char
}

/// Applies a device-specific output index remap (e.g. 18i8 Gen 3's
/// `{0,1,4,5,6,7,2,3}`) before formatting, per §4.1.
pub fn format_port_name_remapped(
    ty: PortType,
    index: usize,
    remap: Option<&[u8]>,
) -> String {
    let mapped = match remap {
        Some(table) if ty == PortType::Analogue && index < table.len() => {
            table[index] as usize
        }
        _ => index,
    };
    format_port_name(ty, mapped)
}

/// `wire_id → index` is total; fails for unknown wire IDs. Exposed as a
/// `Result`-returning wrapper for the control surface.
pub fn try_index_of(
    ports: &DirectionPorts,
    band: SampleRateBand,
    wire_id: u16,
) -> Result<usize> {
    index_of(ports, band, wire_id).ok_or(Error::BadArgument("unknown wire ID"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ports() -> DirectionPorts {
        DirectionPorts {
            none: BandCounts::flat(4),
            analogue: BandCounts::flat(10),
            spdif: BandCounts::flat(2),
            adat: BandCounts([8, 8, 4, 0]),
            adat2: BandCounts::default(),
            mix: BandCounts::flat(18),
            pcm: BandCounts::flat(20),
            internal_mic: BandCounts::default(),
            talkback: BandCounts::default(),
        }
    }

    #[test]
    fn round_trip_every_declared_port() {
        let ports = sample_ports();
        let band = SampleRateBand::Default;
        for &ty in PORT_TYPE_ORDER.iter() {
            let count = ports.counts(ty).count(band);
            for idx in 0..count {
                let wire = wire_id_of(ty, idx);
                if wire == 0 {
                    // The reserved zero ID decodes as "Off", never as a
                    // concrete port, even if some type's base is zero.
                    continue;
                }
                let got = index_of(&ports, band, wire).expect("wire id must resolve");
                assert_eq!(got, flatten(&ports, band, ty, idx));
            }
        }
    }

    #[test]
    fn zero_wire_id_is_off() {
        let ports = sample_ports();
        assert_eq!(index_of(&ports, SampleRateBand::Default, 0), None);
    }

    #[test]
    fn unknown_wire_id_fails() {
        let ports = sample_ports();
        assert_eq!(index_of(&ports, SampleRateBand::Default, 0xFFF), None);
    }

    #[test]
    fn adat_shrinks_at_high_bandwidth() {
        let ports = sample_ports();
        assert_eq!(ports.counts(PortType::Adat).count(SampleRateBand::Br88_96), 4);
        assert_eq!(ports.counts(PortType::Adat).count(SampleRateBand::Br176_192), 0);
    }

    #[test]
    fn output_remap_reindexes_analogue_names() {
        let remap = [0u8, 1, 4, 5, 6, 7, 2, 3];
        assert_eq!(
            format_port_name_remapped(PortType::Analogue, 2, Some(&remap)),
            "Analogue 5"
        );
        assert_eq!(
            format_port_name_remapped(PortType::Analogue, 2, None),
            "Analogue 3"
        );
    }
}
