//! Shared one-shot signals: the ready broadcast and the close broadcast.
//!
//! Both signals share the same shape: any number of tasks may wait on them
//! concurrently, firing happens at most once, and a wait issued after the
//! signal already fired returns immediately rather than blocking forever.
//! This generalizes the teacher's `PlayingState` condvar plumbing (which
//! tracked a richer state machine this design doesn't need) down to a
//! single bit.
//!
//! Two wait styles are needed: a plain blocking `wait()` (used by
//! `Client::wait_ready`) and a `Receiver<()>` usable inside a
//! `crossbeam_channel::select!` alongside a ticker or a playable queue
//! (used by the heartbeater and the RTP sender to select on "close fired
//! OR my primary event"). Firing drops the channel's sender, which makes
//! every outstanding and future receiver ready immediately — a
//! broadcast-once signal built out of a dropped channel.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

pub struct OneShot {
    fired: Mutex<bool>,
    cond: Condvar,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Default for OneShot {
    fn default() -> Self {
        Self::new()
    }
}

impl OneShot {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self { fired: Mutex::new(false), cond: Condvar::new(), sender: Mutex::new(Some(tx)), receiver: rx }
    }

    /// Fires the signal. Idempotent: firing an already-fired signal is a noop.
    pub fn fire(&self) {
        let mut guard = self.fired.lock();
        if !*guard {
            *guard = true;
            self.sender.lock().take();
            self.cond.notify_all();
        }
    }

    /// Blocks until `fire` has been called at least once (including before
    /// this call was made).
    pub fn wait(&self) {
        let mut guard = self.fired.lock();
        while !*guard {
            self.cond.wait(&mut guard);
        }
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    /// A channel that becomes ready (as a disconnect) once `fire` is
    /// called, for use inside `crossbeam_channel::select!`.
    pub fn wait_channel(&self) -> Receiver<()> {
        self.receiver.clone()
    }
}

/// Write-once cell for the 32-byte secretbox key: written only by the
/// websocket task on SESSION DESCRIPTION (op 4), read only by the sender
/// task thereafter. Zero until set; callers must wait on a
/// `secret_key_ready` signal rather than trust the value before that.
#[derive(Default)]
pub struct SecretKeyCell {
    key: parking_lot::RwLock<[u8; 32]>,
}

impl SecretKeyCell {
    pub fn new() -> Self {
        Self { key: parking_lot::RwLock::new([0u8; 32]) }
    }

    pub fn set(&self, key: [u8; 32]) {
        *self.key.write() = key;
    }

    pub fn get(&self) -> [u8; 32] {
        *self.key.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_after_fire_returns_immediately() {
        let signal = OneShot::new();
        signal.fire();
        signal.wait();
        assert!(signal.is_fired());
    }

    #[test]
    fn fire_is_idempotent() {
        let signal = OneShot::new();
        signal.fire();
        signal.fire();
        assert!(signal.is_fired());
    }

    #[test]
    fn wait_unblocks_once_fired_from_another_thread() {
        let signal = Arc::new(OneShot::new());
        let waiter = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            waiter.wait();
        });
        thread::sleep(Duration::from_millis(20));
        signal.fire();
        handle.join().expect("waiter thread panicked");
    }

    #[test]
    fn wait_channel_becomes_ready_on_fire() {
        let signal = OneShot::new();
        let rx = signal.wait_channel();
        assert!(rx.try_recv().is_err());
        signal.fire();
        // The channel is now disconnected, which `recv` surfaces as an error
        // but which a `select!` treats as the branch becoming ready.
        assert!(rx.recv().is_err());
    }

    #[test]
    fn secret_key_cell_defaults_to_zero() {
        let cell = SecretKeyCell::new();
        assert_eq!(cell.get(), [0u8; 32]);
        cell.set([7u8; 32]);
        assert_eq!(cell.get(), [7u8; 32]);
    }
}
