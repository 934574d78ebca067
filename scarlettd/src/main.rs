//! Transport/bootstrap glue (C0): descriptor walk, logging setup, initial
//! mirror population, and process lifecycle.
//!
//! Grounded in `usbhubd`'s plain `fn main()` + `env::args().skip(1)`
//! convention (a per-device USB client driver spawned directly by its bus
//! driver does not daemonize the way `ac97d`'s PCI driver does), with
//! `--probe` grounded in `hwd`'s `probe()` entry point.

use std::env;
use std::sync::Arc;

use spin::Mutex;
use usb_iface::VendorClientHandle;

mod commit;
mod control;
mod device_registry;
mod error;
mod mixer;
mod notify;
mod ports;
mod protocol;
mod refresh;
mod routing;
mod scheme;
mod state;
mod sw_config;
mod transport;

use control::{Control, Device};
use device_registry::DeviceModel;
use scheme::NamedControl;
use state::{Staleness, StateStore};

const USAGE: &str = "scarlettd [--probe] <scheme> <port> <interface> [device_setup_bits]";

/// Bit 0: enable normal operation (unset = initialize passive, log an
/// advisory, still serve the scheme read-only). Bit 1: expose the MSD
/// mode control even on models that declare `has_msd`.
const SETUP_ENABLE_BIT: u32 = 0x1;
const SETUP_MSD_VISIBLE_BIT: u32 = 0x2;

fn main() {
    common::setup_logging(
        "usb",
        "device",
        "scarlett",
        common::output_level(),
        common::file_level(),
    );

    let raw_args: Vec<String> = env::args().skip(1).collect();

    if raw_args.first().map(String::as_str) == Some("--probe") {
        let (scheme, port, interface_num) = parse_positional(&raw_args[1..]);
        return probe(scheme, port, interface_num);
    }

    let (scheme, port, interface_num) = parse_positional(&raw_args);
    let device_setup_bits: u32 = raw_args
        .get(3)
        .and_then(|s| s.parse().ok())
        .unwrap_or(SETUP_ENABLE_BIT);

    log::info!(
        "scarlettd spawned with scheme `{scheme}`, port {port}, interface {interface_num}, setup bits 0x{device_setup_bits:x}"
    );

    let handle = VendorClientHandle::new(scheme.clone(), port.to_string());
    let desc = handle
        .get_standard_descs()
        .expect("scarlettd: failed to get standard descriptors");

    let model = device_registry::model_for(desc.vendor, desc.product).unwrap_or_else(|| {
        panic!(
            "scarlettd: unsupported device {:04x}:{:04x}",
            desc.vendor, desc.product
        )
    });
    log::info!("matched device model `{}`", model.name);

    let vendor_iface =
        transport::locate_vendor_interface(&desc).expect("scarlettd: no vendor control interface");
    let interface_num = vendor_iface.interface_num;

    let transport = Arc::new(transport::Transport::new(handle, interface_num));

    if device_setup_bits & SETUP_ENABLE_BIT == 0 {
        log::warn!("device_setup bit 0 unset; initializing passive (no config writes will be issued)");
    } else {
        run_init_sequence(&transport);
    }

    let mut initial_state = StateStore::new(model);
    if device_setup_bits & SETUP_ENABLE_BIT != 0 {
        bootstrap_state(&transport, model, &mut initial_state);
    }

    let staleness = Arc::new(Staleness::new());
    let device = Box::leak(Box::new(Device {
        transport: transport.clone(),
        model,
        state: Mutex::new(initial_state),
        staleness: staleness.clone(),
        commit: commit::DeferredCommit::new(transport.clone()),
    }));

    let expose_msd = model.has_msd && device_setup_bits & SETUP_MSD_VISIBLE_BIT != 0;
    let controls = build_controls(model, expose_msd);

    if let Some(ep_num) = vendor_iface.interrupt_endpoint {
        match transport.handle().open_endpoint(ep_num) {
            Ok(endpoint) => {
                notify::spawn_notification_thread(endpoint, staleness);
            }
            Err(err) => log::warn!("failed to open interrupt endpoint {ep_num}: {err}"),
        }
    } else {
        log::info!("device exposes no interrupt endpoint; notifications disabled");
    }

    let scheme_name = format!("scarlett.{}", model.name.replace(' ', "_").to_lowercase());
    scheme::run(&scheme_name, device, controls).expect("scarlettd: control scheme loop exited");
}

fn parse_positional(args: &[String]) -> (String, usize, u8) {
    let scheme = args.first().expect(USAGE).clone();
    let port = args.get(1).expect(USAGE).parse::<usize>().expect("expected integer port");
    let interface_num = args
        .get(2)
        .expect(USAGE)
        .parse::<u8>()
        .expect("expected integer interface number");
    (scheme, port, interface_num)
}

/// `--probe`: dumps the decoded descriptor and matched model table at
/// `info` level without touching any control, grounded in `hwd`'s
/// `probe()` style.
fn probe(scheme: String, port: usize, interface_num: u8) {
    let handle = VendorClientHandle::new(scheme, port.to_string());
    let desc = handle.get_standard_descs().expect("scarlettd --probe: failed to get descriptors");
    log::info!("{desc:x?}");

    match device_registry::model_for(desc.vendor, desc.product) {
        Some(model) => {
            log::info!(
                "matched `{}`: {} analogue out, {} mix inputs, {} mix outputs, software-config: {}",
                model.name,
                model.ports.output.analogue.count(ports::SampleRateBand::Default),
                model.mix_inputs,
                model.mix_outputs,
                model.has_software_config,
            );
        }
        None => log::warn!("device {:04x}:{:04x} is not a recognised Scarlett", desc.vendor, desc.product),
    }

    match transport::locate_vendor_interface(&desc) {
        Ok(vendor_iface) => log::info!(
            "vendor interface {}, interrupt endpoint {:?}",
            vendor_iface.interface_num,
            vendor_iface.interrupt_endpoint
        ),
        Err(err) => log::warn!("no vendor interface located: {err}"),
    }

    let _ = interface_num;
}

/// "Cargo-cult" init handshake (§4.12): the INIT_1/INIT_2 re-seedings.
/// The spec additionally names an unlisted 24-byte `GET_CMD_INIT` bulk
/// read with no corresponding protocol command constant; this driver
/// omits it rather than fabricate one (see DESIGN.md).
fn run_init_sequence(transport: &transport::Transport) {
    transport
        .command_reseeded(protocol::CMD_INIT_1, &[], 0)
        .expect("scarlettd: INIT_1 failed");
    transport
        .command_reseeded(protocol::CMD_INIT_2, &[], 84)
        .expect("scarlettd: INIT_2 failed");
}

/// Reads back the device's current mux, mixer rows, config items, and (if
/// present) software-config blob into `state`, per §4.12's "read all
/// config items, read mux, read mixer matrices, read software-config
/// blob" bootstrap sequence.
fn bootstrap_state(transport: &transport::Transport, model: &DeviceModel, state: &mut StateStore) {
    if let Err(err) = routing::get_mux(transport, model, state) {
        log::warn!("initial mux read failed: {err}");
    }
    for output in 0..model.mix_outputs {
        if let Err(err) = mixer::get_mix(transport, &mut state.mixer, output) {
            log::warn!("initial mixer row {output} read failed: {err}");
        }
    }
    if let Err(err) = refresh::refresh_volumes(transport, model, state) {
        log::warn!("initial volume read failed: {err}");
    }
    if let Err(err) = refresh::refresh_line_controls(transport, model, state) {
        log::warn!("initial line control read failed: {err}");
    }
    if let Err(err) = refresh::refresh_speaker_state(transport, model, state) {
        log::warn!("initial speaker state read failed: {err}");
    }
    if let Err(err) = refresh::refresh_sync(transport, state) {
        log::warn!("initial sync status read failed: {err}");
    }

    if model.has_software_config {
        match transport.get_data(sw_config::BASE_OFFSET, sw_config::TOTAL_LEN) {
            Ok(bytes) if bytes.iter().all(|&b| b == 0) => {
                log::info!("software-config blob absent; uploading default blob");
                let cfg = sw_config::SwConfig::default_blob();
                if let Err(err) = cfg.commit_all(transport) {
                    log::warn!("failed to upload default software-config blob: {err}");
                } else {
                    state.sw_config = Some(cfg);
                }
            }
            Ok(bytes) => match sw_config::SwConfig::from_device_bytes(&bytes) {
                Ok(cfg) => state.sw_config = Some(cfg),
                Err(err) => log::warn!("software-config blob invalid, entering degraded mode: {err}"),
            },
            Err(err) => log::warn!("software-config blob read failed, entering degraded mode: {err}"),
        }
    }
}

/// Enumerates every applicable `Control` for `model`, respecting its
/// feature gates (§6), with matching `min`/`max` ranges.
fn build_controls(model: &'static DeviceModel, expose_msd: bool) -> Vec<NamedControl> {
    let mut controls = Vec::new();
    let analogue_out = model.ports.output.analogue.count(ports::SampleRateBand::Default);
    let analogue_in = model.ports.input.analogue.count(ports::SampleRateBand::Default);

    let named = |control: Control, min: i64, max: i64| NamedControl {
        name: control.name(model),
        control,
        min,
        max,
    };

    for ch in 0..analogue_out {
        controls.push(named(Control::Volume(ch), 0, 127));
        controls.push(named(Control::Mute(ch), 0, 1));
        controls.push(named(Control::SwHwSwitch(ch), 0, 1));
    }
    controls.push(named(Control::MasterVolume, 0, 127));
    controls.push(named(Control::DimMute, 0, 3));

    for ch in 0..analogue_in {
        controls.push(named(Control::Pad(ch), 0, 1));
        controls.push(named(Control::Air(ch), 0, 1));
        controls.push(named(Control::InstLevel(ch), 0, 1));
        controls.push(named(Control::Phantom48v(ch), 0, 1));
    }
    if model.has_retain_48v {
        controls.push(named(Control::Retain48v, 0, 1));
    }
    controls.push(named(Control::SpeakerSwitch, 0, 1));
    if model.has_talkback {
        controls.push(named(Control::TalkbackSwitch, 0, 1));
    }
    if model.has_direct_monitor {
        controls.push(named(Control::DirectMonitor, 0, 1));
    }
    if expose_msd {
        controls.push(named(Control::MsdMode, 0, 1));
    }

    for &ty in &ports::PORT_TYPE_ORDER {
        let count = model.ports.output.counts(ty).count(ports::SampleRateBand::Default);
        if ty == ports::PortType::None {
            continue;
        }
        for idx in 0..count {
            let dst_wire = ports::wire_id_of(ty, idx);
            controls.push(named(Control::Mux(dst_wire), 0, 0x0FFF));
        }
    }

    for out in 0..model.mix_outputs {
        for inp in 0..model.mix_inputs {
            controls.push(named(Control::MixGain(out, inp), 0, mixer::MAX_GAIN_INDEX as i64));
            controls.push(named(Control::MixMute(out, inp), 0, 1));
        }
        if model.has_talkback {
            controls.push(named(Control::MixTalkback(out), 0, 1));
        }
    }

    controls.push(named(Control::SyncStatus, 0, 1));
    for idx in 0..model.meter_count {
        controls.push(named(Control::LevelMeter(idx), 0, 4095));
    }

    controls.push(named(Control::LedCustomColors, 0, 1));
    controls.push(named(Control::LedClipColor, 0, 1));
    controls.push(named(Control::LedPreClipColor, 0, 1));
    controls.push(named(Control::LedGoodColor, 0, 1));
    for ch in 0..analogue_out {
        controls.push(named(Control::LedNCustomColor(ch), 0, 1));
    }

    controls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_controls_covers_every_analogue_output_volume() {
        let model = device_registry::DEVICES
            .iter()
            .find(|m| m.name == "Scarlett 18i20 G3")
            .unwrap();
        let controls = build_controls(model, true);
        let volume_controls = controls
            .iter()
            .filter(|nc| matches!(nc.control, Control::Volume(_)))
            .count();
        assert_eq!(volume_controls, 10);
    }

    #[test]
    fn setup_bits_gate_msd_visibility() {
        assert_eq!(SETUP_ENABLE_BIT, 0x1);
        assert_eq!(SETUP_MSD_VISIBLE_BIT, 0x2);
    }

    #[test]
    fn build_controls_exposes_sync_meters_and_led_controls() {
        let model = device_registry::DEVICES
            .iter()
            .find(|m| m.name == "Scarlett 18i20 G3")
            .unwrap();
        let controls = build_controls(model, true);

        assert_eq!(controls.iter().filter(|nc| matches!(nc.control, Control::SyncStatus)).count(), 1);
        let meter_controls = controls.iter().filter(|nc| matches!(nc.control, Control::LevelMeter(_))).count();
        assert_eq!(meter_controls, model.meter_count);
        let talkback_controls = controls.iter().filter(|nc| matches!(nc.control, Control::MixTalkback(_))).count();
        assert_eq!(talkback_controls, model.mix_outputs);
        assert_eq!(controls.iter().filter(|nc| matches!(nc.control, Control::LedCustomColors)).count(), 1);
    }

    #[test]
    fn talkback_controls_absent_without_talkback_bus() {
        let model = device_registry::DEVICES
            .iter()
            .find(|m| m.name == "Scarlett 18i20 G2")
            .unwrap();
        let controls = build_controls(model, true);
        assert!(controls.iter().all(|nc| !matches!(nc.control, Control::MixTalkback(_))));
    }
}
