//! Notification Loop (C10): the dedicated blocking-read thread that
//! decodes the 8-byte interrupt payload and raises staleness flags.
//!
//! Grounded in `usbhidd`'s interrupt-in polling loop, adapted from a
//! per-report HID decode to the Scarlett's single 32-bit bitmask. This is
//! the one place the implementation departs from a literal async URB
//! resubmission loop: no portable async interrupt-submission primitive
//! exists at this abstraction level, so the loop lives on its own
//! `std::thread` performing blocking reads (SPEC_FULL.md §5 note).

use std::sync::Arc;
use std::thread;

use bitflags::bitflags;
use log::{debug, warn};

use crate::state::Staleness;
use usb_iface::VendorEndpHandle;

const NOTIFY_PAYLOAD_LEN: usize = 8;

bitflags! {
    /// The first little-endian u32 of the 8-byte interrupt payload (§4.8).
    /// `DIM_MUTE` and `VOLUME` are distinct hardware events that both
    /// resolve to the same `vol_stale` flag.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct EventBits: u32 {
        const SYNC     = 0x0000_0008;
        const DIM_MUTE = 0x0020_0000;
        const VOLUME   = 0x0040_0000;
        const LINE_CTL = 0x0080_0000;
        const SPEAKER  = 0x0100_0000;
    }
}

/// Decodes the first little-endian u32 of an 8-byte interrupt payload and
/// raises the matching staleness flags; never touches `data_mutex` or
/// `usb_mutex` (§5, §4.8).
pub fn dispatch(payload: &[u8], staleness: &Staleness) {
    if payload.len() < 4 {
        warn!("interrupt payload shorter than one bitmask word: {} bytes", payload.len());
        return;
    }
    let raw = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let bits = EventBits::from_bits_truncate(raw);

    if bits.contains(EventBits::SYNC) {
        staleness.mark_sync();
    }
    if bits.intersects(EventBits::DIM_MUTE | EventBits::VOLUME) {
        staleness.mark_volume();
    }
    if bits.contains(EventBits::LINE_CTL) {
        staleness.mark_line_ctl();
    }
    if bits.contains(EventBits::SPEAKER) {
        staleness.mark_speaker();
    }

    let unknown = raw & !EventBits::all().bits();
    if unknown != 0 {
        debug!("interrupt bitmask set unrecognised bits 0x{unknown:08x}");
    }
}

/// Spawns the notification thread, which blocks on `endpoint.transfer_read`
/// in a loop for as long as the read keeps succeeding. A read error ends
/// the loop; the driver continues operating on whatever state it last
/// mirrored, since the staleness flags only ever get more conservative
/// (never falsely cleared) by no longer being set.
pub fn spawn_notification_thread(
    mut endpoint: VendorEndpHandle,
    staleness: Arc<Staleness>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; NOTIFY_PAYLOAD_LEN];
        loop {
            match endpoint.transfer_read(&mut buf) {
                Ok(n) if n > 0 => dispatch(&buf[..n], &staleness),
                Ok(_) => continue,
                Err(err) => {
                    warn!("notification endpoint read failed, stopping notification loop: {err}");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_bit_marks_sync_stale() {
        let staleness = Staleness::new();
        dispatch(&[0x08, 0, 0, 0, 0, 0, 0, 0], &staleness);
        assert!(staleness.take_sync());
        assert!(!staleness.take_volume());
    }

    #[test]
    fn monitor_volume_bit_marks_volume_stale() {
        // Seed scenario S4: inject 0x00400000, expect vol_stale=1.
        let staleness = Staleness::new();
        dispatch(&EventBits::VOLUME.bits().to_le_bytes(), &staleness);
        assert!(staleness.take_volume());
        assert!(!staleness.take_line_ctl());
    }

    #[test]
    fn dim_mute_bit_also_marks_volume_stale() {
        let staleness = Staleness::new();
        dispatch(&EventBits::DIM_MUTE.bits().to_le_bytes(), &staleness);
        assert!(staleness.take_volume());
    }

    #[test]
    fn line_ctl_bit_marks_line_ctl_stale_not_volume() {
        let staleness = Staleness::new();
        dispatch(&EventBits::LINE_CTL.bits().to_le_bytes(), &staleness);
        assert!(staleness.take_line_ctl());
        assert!(!staleness.take_volume());
    }

    #[test]
    fn combined_bits_mark_every_matching_flag() {
        let staleness = Staleness::new();
        let bits = EventBits::VOLUME | EventBits::SPEAKER;
        dispatch(&bits.bits().to_le_bytes(), &staleness);
        assert!(staleness.take_volume());
        assert!(staleness.take_speaker());
        assert!(!staleness.take_line_ctl());
    }

    #[test]
    fn short_payload_is_ignored_without_panic() {
        let staleness = Staleness::new();
        dispatch(&[0x08], &staleness);
        assert!(!staleness.take_sync());
    }
}
