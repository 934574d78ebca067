//! Control scheme front-end (C12, SPEC_FULL.md §4.13): a thin debug/probe
//! resource exposing every `Control` as `scarlett.<name>:`, read as
//! `name\tvalue\tmin\tmax` lines and written as `name=value\n`.
//!
//! Grounded in `inputd`'s `Socket<V2>`/`SchemeMut`/request-loop shape and
//! `ac97d`'s one-scheme-per-daemon convention. This is explicitly NOT the
//! full host mixer framework registration API (out of scope per
//! SPEC_FULL.md): it is a diagnostic/manual-control surface, the same role
//! `hwd`'s probe output plays for PCI devices.

use std::io;

use redox_scheme::{RequestKind, SchemeMut, SignalBehavior, Socket, V2};
use syscall::{Error as SysError, EINVAL};

use crate::control::{Control, Device};

/// One addressable control surfaced on the scheme, paired with its
/// current `min`/`max` range for the `name\tvalue\tmin\tmax` read line.
pub struct NamedControl {
    pub name: String,
    pub control: Control,
    pub min: i64,
    pub max: i64,
}

/// One open handle's read cursor: the rendered snapshot is captured at
/// open time so a multi-read client sees a consistent view.
struct Handle {
    snapshot: Vec<u8>,
}

/// Backs the `scarlett.<name>:` resource: opening it captures a snapshot
/// of every control's current value; writing a `name=value\n` line
/// applies one mutation immediately.
pub struct ScarlettScheme {
    device: &'static Device,
    controls: Vec<NamedControl>,
    handles: std::collections::BTreeMap<usize, Handle>,
    next_id: usize,
}

impl ScarlettScheme {
    pub fn new(device: &'static Device, controls: Vec<NamedControl>) -> Self {
        Self {
            device,
            controls,
            handles: std::collections::BTreeMap::new(),
            next_id: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let mut out = String::new();
        for nc in &self.controls {
            let value = self.device.get(nc.control).unwrap_or(0);
            out.push_str(&format!("{}\t{}\t{}\t{}\n", nc.name, value, nc.min, nc.max));
        }
        out.into_bytes()
    }

    fn apply_write(&self, line: &str) -> syscall::Result<()> {
        let (name, value) = line.split_once('=').ok_or(SysError::new(EINVAL))?;
        let value: i64 = value.trim().parse().map_err(|_| SysError::new(EINVAL))?;
        let nc = self
            .controls
            .iter()
            .find(|nc| nc.name == name)
            .ok_or(SysError::new(EINVAL))?;
        self.device.put(nc.control, value).map_err(|_| SysError::new(EINVAL))
    }
}

/// Opens the `scarlett.<name>:` scheme and serves requests until the
/// socket is unmounted, per `inputd`'s `Socket<V2>` request loop.
pub fn run(name: &str, device: &'static Device, controls: Vec<NamedControl>) -> io::Result<()> {
    let socket: Socket<V2> = Socket::create(name)?;
    let mut scheme = ScarlettScheme::new(device, controls);

    loop {
        let Some(request) = socket.next_request(SignalBehavior::Restart)? else {
            return Ok(());
        };
        if let RequestKind::Call(call) = request.kind() {
            socket.write_response(
                call.handle_scheme_mut(&mut scheme),
                SignalBehavior::Restart,
            )?;
        }
    }
}

impl SchemeMut for ScarlettScheme {
    fn open(&mut self, _path: &str, _flags: usize, _uid: u32, _gid: u32) -> syscall::Result<usize> {
        let id = self.next_id;
        self.next_id += 1;
        self.handles.insert(
            id,
            Handle {
                snapshot: self.render(),
            },
        );
        Ok(id)
    }

    fn read(&mut self, id: usize, buf: &mut [u8], offset: u64, _flags: u32) -> syscall::Result<usize> {
        let handle = self.handles.get(&id).ok_or(SysError::new(EINVAL))?;
        let offset = offset as usize;
        if offset >= handle.snapshot.len() {
            return Ok(0);
        }
        let remaining = &handle.snapshot[offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        Ok(n)
    }

    fn write(&mut self, id: usize, buf: &[u8], _offset: u64, _flags: u32) -> syscall::Result<usize> {
        self.handles.get(&id).ok_or(SysError::new(EINVAL))?;
        let text = String::from_utf8_lossy(buf);
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            if let Err(err) = self.apply_write(line) {
                log::warn!("control write `{line}` rejected: {err}");
            }
        }
        Ok(buf.len())
    }

    fn close(&mut self, id: usize) -> syscall::Result<usize> {
        self.handles.remove(&id);
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn write_line_without_equals_has_no_split() {
        assert!("no-equals-sign".split_once('=').is_none());
    }
}
