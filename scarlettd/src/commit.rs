//! Deferred Commit (C11): coalesces bursts of config-item mutations into
//! one `DATA_CMD(SAVE)` two seconds after the last mutation, per §4.11
//! and testable property 7 / scenario S7.
//!
//! Grounded in `ac97d`'s save-on-idle pattern, generalised to a dedicated
//! worker thread armed over an `mpsc` channel rather than a polled flag,
//! matching this workspace's preference for explicit channel-based
//! worker threads over shared polling state.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::warn;

use crate::protocol::CMD_DATA_CMD;
use crate::transport::Transport;

const COMMIT_DELAY: Duration = Duration::from_secs(2);

/// Activation word naming the "save current config to NVRAM" operation
/// (§4.11, `CMD_CONFIG_SAVE` reused as the `DATA_CMD` payload).
const SAVE_ACTIVATE_WORD: u32 = crate::protocol::CMD_CONFIG_SAVE;

enum Msg {
    Arm,
    Shutdown,
}

/// Handle to the commit worker thread. Every `arm()` call cancels any
/// pending deadline and re-arms it two seconds out, so N writes within
/// the window produce exactly one `DATA_CMD(SAVE)`.
pub struct DeferredCommit {
    tx: mpsc::Sender<Msg>,
    handle: Option<JoinHandle<()>>,
}

impl DeferredCommit {
    pub fn new(transport: Arc<Transport>) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || Self::worker(rx, transport));
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Cancels any pending deadline and re-arms it `COMMIT_DELAY` from
    /// now.
    pub fn arm(&self) {
        let _ = self.tx.send(Msg::Arm);
    }

    /// Signals the worker to save synchronously (if a commit is pending)
    /// and exit, then joins it — used on driver shutdown/device suspend.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn worker(rx: mpsc::Receiver<Msg>, transport: Arc<Transport>) {
        let mut deadline: Option<Instant> = None;
        loop {
            let timeout = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None => Duration::from_secs(3600),
            };
            match rx.recv_timeout(timeout) {
                Ok(Msg::Arm) => {
                    deadline = Some(Instant::now() + COMMIT_DELAY);
                }
                Ok(Msg::Shutdown) => {
                    if deadline.is_some() {
                        Self::save(&transport);
                    }
                    return;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            Self::save(&transport);
                            deadline = None;
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn save(transport: &Transport) {
        if let Err(err) = transport.command(CMD_DATA_CMD, &SAVE_ACTIVATE_WORD.to_le_bytes(), 0) {
            warn!("deferred config save failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_delay_matches_documented_window() {
        assert_eq!(COMMIT_DELAY, Duration::from_secs(2));
    }
}
