//! Device Registry (C1): static table of supported devices and their
//! per-model parameters.
//!
//! Grounded in the workspace's convention of build-time constant hardware
//! tables (e.g. `pcid`'s class/subclass id tables, `xhcid`'s `usb` module
//! constants): one `&'static [DeviceModel]` scanned by USB vendor/product
//! ID, never a runtime-constructed registry.

use crate::ports::{BandCounts, DirectionPorts, PortType};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Generation {
    Gen2,
    Gen3,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineCtlPacking {
    /// One byte per input channel.
    PerChannelByte,
    /// All channels packed into a single bitmask byte.
    Bitmask,
}

/// A single named on-device item written through SET_DATA + DATA_CMD, per
/// §4.11: `{offset, size, activate}`, repeated `count` times at `stride`
/// byte intervals for multi-instance items (e.g. one volume per output).
#[derive(Clone, Copy, Debug)]
pub struct ConfigItem {
    pub name: &'static str,
    pub offset: u32,
    pub size: u8,
    pub stride: u8,
    pub count: u8,
    pub activate: u32,
}

impl ConfigItem {
    pub const fn single(name: &'static str, offset: u32, size: u8, activate: u32) -> Self {
        Self {
            name,
            offset,
            size,
            stride: size,
            count: 1,
            activate,
        }
    }

    pub const fn array(
        name: &'static str,
        offset: u32,
        size: u8,
        count: u8,
        activate: u32,
    ) -> Self {
        Self {
            name,
            offset,
            size,
            stride: size,
            count,
            activate,
        }
    }

    pub fn offset_of(&self, index: usize) -> u32 {
        self.offset + (index as u32) * (self.stride as u32)
    }
}

/// Config item indices, kept as a flat enum so `device_registry` tables and
/// `control::Surface` agree on which slot of `DeviceModel::config_items`
/// backs which control.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigItemId {
    AnalogueVolume,
    AnalogueMute,
    AnalogueSwHw,
    MasterVolume,
    DimMute,
    Pad,
    Air,
    InstLevel,
    Phantom48v,
    Retain48v,
    SpeakerSwitch,
    TalkbackSwitch,
    DirectMonitor,
    MsdMode,
    LedCustomColors,
    LedClipColor,
    LedPreClipColor,
    LedGoodColor,
    LedNCustomColor,
}

pub const CONFIG_ITEM_COUNT: usize = 19;

/// 24-bit mux entries are grouped per sample-rate band into three wire
/// groups, per §4.5 ("for each sample-rate band b ∈ {default/44.1/48,
/// 88.2/96, 176.4/192}").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MuxBand {
    Low,
    Mid,
    High,
}
pub const MUX_BANDS: [MuxBand; 3] = [MuxBand::Low, MuxBand::Mid, MuxBand::High];

impl MuxBand {
    pub fn index(self) -> usize {
        match self {
            MuxBand::Low => 0,
            MuxBand::Mid => 1,
            MuxBand::High => 2,
        }
    }
    /// The representative `SampleRateBand` used to size ports for this mux
    /// group (default and 44.1/48 share one mux layout).
    pub fn sample_band(self) -> crate::ports::SampleRateBand {
        use crate::ports::SampleRateBand;
        match self {
            MuxBand::Low => SampleRateBand::Default,
            MuxBand::Mid => SampleRateBand::Br88_96,
            MuxBand::High => SampleRateBand::Br176_192,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceModel {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
    pub generation: Generation,
    pub ports: DirectionPorts2,
    /// Emission order of destination types used to build the SET_MUX
    /// payload; see `routing::mux_layout_for`.
    pub mux_dest_order: &'static [PortType],
    pub mix_inputs: usize,
    pub mix_outputs: usize,
    pub has_talkback: bool,
    pub has_software_config: bool,
    pub has_msd: bool,
    pub has_direct_monitor: bool,
    pub has_retain_48v: bool,
    pub line_ctl_packing: LineCtlPacking,
    pub output_remap: Option<&'static [u8]>,
    pub config_items: [ConfigItem; CONFIG_ITEM_COUNT],
    pub meter_count: usize,
}

/// Per-direction port tables (input and output), kept as a plain struct
/// rather than a two-element array so call sites read naturally
/// (`model.ports.input`, `model.ports.output`).
#[derive(Clone, Copy, Debug)]
pub struct DirectionPorts2 {
    pub input: DirectionPorts,
    pub output: DirectionPorts,
}

impl DeviceModel {
    pub fn config_item(&self, id: ConfigItemId) -> &ConfigItem {
        &self.config_items[id as usize]
    }

    pub fn usb_id(&self) -> (u16, u16) {
        (self.vendor_id, self.product_id)
    }
}

const fn c(name: &'static str, offset: u32, size: u8, count: u8, activate: u32) -> ConfigItem {
    ConfigItem::array(name, offset, size, count, activate)
}

/// Canonical per-item layout shared by every model: most config items live
/// at the same relative offsets because the on-device firmware shares one
/// layout across the product line, differing mainly in `count` (number of
/// analogue channels).
const fn standard_config_items(analogue_out: u8, analogue_in: u8) -> [ConfigItem; CONFIG_ITEM_COUNT] {
    [
        c("volume", 0x34, 2, analogue_out, 1),
        c("mute", 0x5C, 1, analogue_out, 1),
        c("sw_hw_switch", 0x66, 1, analogue_out, 2),
        c("master_volume", 0x76, 2, 1, 3),
        c("dim_mute", 0x78, 1, 1, 3),
        c("pad", 0x7A, 1, analogue_in, 4),
        c("air", 0x84, 1, analogue_in, 5),
        c("inst_level", 0x8E, 1, analogue_in, 6),
        c("phantom_48v", 0x98, 1, analogue_in, 7),
        c("retain_48v", 0x9A, 1, 1, 0),
        c("speaker_switch", 0x9B, 1, 1, 8),
        c("talkback_switch", 0x9C, 1, 1, 8),
        c("direct_monitor", 0x9D, 1, 1, 9),
        c("msd_mode", 0x9E, 1, 1, 0),
        c("led_custom_colors", 0x9F, 1, 1, 10),
        c("led_clip_color", 0xA0, 1, 1, 10),
        c("led_pre_clip_color", 0xA1, 1, 1, 10),
        c("led_good_color", 0xA2, 1, 1, 10),
        c("led_n_custom_color", 0xA3, 1, analogue_out, 10),
    ]
}

const fn ports(
    analogue: (u8, u8),
    spdif: (u8, u8),
    adat: (u8, u8),
    mix: (u8, u8),
    pcm: (u8, u8),
) -> DirectionPorts2 {
    DirectionPorts2 {
        input: DirectionPorts {
            none: BandCounts::flat(4),
            analogue: BandCounts::flat(analogue.0),
            spdif: BandCounts::flat(spdif.0),
            adat: BandCounts::flat(adat.0),
            adat2: BandCounts::flat(0),
            mix: BandCounts::flat(mix.1), // mux sources from Mix = mixer bus outputs (M)
            pcm: BandCounts::flat(pcm.0),
            internal_mic: BandCounts::flat(1),
            talkback: BandCounts::flat(0),
        },
        output: DirectionPorts {
            none: BandCounts::flat(0),
            analogue: BandCounts::flat(analogue.1),
            spdif: BandCounts::flat(spdif.1),
            adat: BandCounts::flat(adat.1),
            adat2: BandCounts::flat(0),
            mix: BandCounts::flat(mix.0), // mux destinations into Mix = mixer input slots (N)
            pcm: BandCounts::flat(pcm.1),
            internal_mic: BandCounts::flat(0),
            talkback: BandCounts::flat(0),
        },
    }
}

const DEFAULT_MUX_ORDER: &[PortType] = &[
    PortType::Analogue,
    PortType::Spdif,
    PortType::Adat,
    PortType::Adat2,
    PortType::Mix,
    PortType::Pcm,
];

pub static DEVICES: &[DeviceModel] = &[
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8201,
        name: "Scarlett 18i20 G2",
        generation: Generation::Gen2,
        ports: ports((10, 10), (2, 2), (8, 8), (18, 6), (20, 18)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 18,
        mix_outputs: 6,
        has_talkback: false,
        has_software_config: false,
        has_msd: false,
        has_direct_monitor: false,
        has_retain_48v: false,
        line_ctl_packing: LineCtlPacking::PerChannelByte,
        output_remap: None,
        config_items: standard_config_items(10, 8),
        meter_count: 56,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8203,
        name: "Scarlett 6i6 G2",
        generation: Generation::Gen2,
        ports: ports((4, 4), (2, 2), (0, 0), (10, 4), (6, 6)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 10,
        mix_outputs: 4,
        has_talkback: false,
        has_software_config: false,
        has_msd: false,
        has_direct_monitor: false,
        has_retain_48v: false,
        line_ctl_packing: LineCtlPacking::PerChannelByte,
        output_remap: None,
        config_items: standard_config_items(4, 2),
        meter_count: 18,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8204,
        name: "Scarlett 18i8 G2",
        generation: Generation::Gen2,
        ports: ports((8, 6), (2, 2), (8, 0), (14, 6), (8, 18)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 14,
        mix_outputs: 6,
        has_talkback: false,
        has_software_config: false,
        has_msd: false,
        has_direct_monitor: false,
        has_retain_48v: false,
        line_ctl_packing: LineCtlPacking::PerChannelByte,
        output_remap: None,
        config_items: standard_config_items(6, 8),
        meter_count: 34,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8210,
        name: "Scarlett 2i2 G3",
        generation: Generation::Gen3,
        ports: ports((2, 2), (0, 0), (0, 0), (10, 2), (2, 2)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 10,
        mix_outputs: 2,
        has_talkback: false,
        has_software_config: true,
        has_msd: true,
        has_direct_monitor: true,
        has_retain_48v: true,
        line_ctl_packing: LineCtlPacking::Bitmask,
        output_remap: None,
        config_items: standard_config_items(2, 2),
        meter_count: 8,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8211,
        name: "Scarlett Solo G3",
        generation: Generation::Gen3,
        ports: ports((2, 2), (0, 0), (0, 0), (4, 2), (2, 2)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 4,
        mix_outputs: 2,
        has_talkback: false,
        has_software_config: false,
        has_msd: true,
        has_direct_monitor: false,
        has_retain_48v: true,
        line_ctl_packing: LineCtlPacking::Bitmask,
        output_remap: None,
        config_items: standard_config_items(2, 2),
        meter_count: 4,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8212,
        name: "Scarlett 4i4 G3",
        generation: Generation::Gen3,
        ports: ports((4, 4), (0, 0), (0, 0), (12, 4), (4, 4)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 12,
        mix_outputs: 4,
        has_talkback: false,
        has_software_config: true,
        has_msd: true,
        has_direct_monitor: true,
        has_retain_48v: true,
        line_ctl_packing: LineCtlPacking::Bitmask,
        output_remap: None,
        config_items: standard_config_items(4, 2),
        meter_count: 12,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8213,
        name: "Scarlett 8i6 G3",
        generation: Generation::Gen3,
        ports: ports((6, 6), (2, 2), (0, 0), (16, 6), (6, 8)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 16,
        mix_outputs: 6,
        has_talkback: false,
        has_software_config: true,
        has_msd: true,
        has_direct_monitor: false,
        has_retain_48v: true,
        line_ctl_packing: LineCtlPacking::Bitmask,
        output_remap: None,
        config_items: standard_config_items(6, 4),
        meter_count: 20,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8214,
        name: "Scarlett 18i8 G3",
        generation: Generation::Gen3,
        ports: ports((8, 8), (2, 2), (8, 0), (20, 6), (8, 18)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 20,
        mix_outputs: 6,
        has_talkback: true,
        has_software_config: true,
        has_msd: true,
        has_direct_monitor: false,
        has_retain_48v: true,
        line_ctl_packing: LineCtlPacking::Bitmask,
        output_remap: Some(&[0, 1, 4, 5, 6, 7, 2, 3]),
        config_items: standard_config_items(8, 8),
        meter_count: 34,
    },
    DeviceModel {
        vendor_id: 0x1235,
        product_id: 0x8215,
        name: "Scarlett 18i20 G3",
        generation: Generation::Gen3,
        ports: ports((10, 10), (2, 2), (8, 8), (25, 12), (20, 18)),
        mux_dest_order: DEFAULT_MUX_ORDER,
        mix_inputs: 25,
        mix_outputs: 12,
        has_talkback: true,
        has_software_config: true,
        has_msd: true,
        has_direct_monitor: false,
        has_retain_48v: true,
        line_ctl_packing: LineCtlPacking::Bitmask,
        output_remap: None,
        config_items: standard_config_items(10, 10),
        meter_count: 56,
    },
];

pub fn model_for(vendor_id: u16, product_id: u16) -> Option<&'static DeviceModel> {
    DEVICES
        .iter()
        .find(|m| m.vendor_id == vendor_id && m.product_id == product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_device_resolves_by_usb_id() {
        for model in DEVICES {
            let found = model_for(model.vendor_id, model.product_id).expect("model registered");
            assert_eq!(found.name, model.name);
        }
    }

    #[test]
    fn unknown_usb_id_is_absent() {
        assert!(model_for(0xDEAD, 0xBEEF).is_none());
    }

    #[test]
    fn config_items_cover_declared_channel_counts() {
        for model in DEVICES {
            let analogue_out = model
                .ports
                .output
                .analogue
                .count(crate::ports::SampleRateBand::Default);
            let item = model.config_item(ConfigItemId::AnalogueVolume);
            assert_eq!(item.count as usize, analogue_out);
        }
    }
}
