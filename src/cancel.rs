//! Composes external caller cancel, server shutdown, and per-task timeout
//! into a single cancellation signal (`CompositeCancel` in spec terms).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Caller,
    Shutdown,
    Timeout,
}

/// The first source to call `fire` wins; later calls are no-ops. Every
/// observer therefore sees exactly one terminal reason, never a race
/// between two different ones.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<CancelReason>>>,
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
            tx,
            rx,
        }
    }

    pub fn fire(&self, reason: CancelReason) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            *self.reason.lock() = Some(reason);
            let _ = self.tx.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock()
    }

    /// A receiver that wakes once `fire` first succeeds. Only one clone
    /// should be polled at a time — the caller is expected to request a
    /// fresh clone each time it starts a new waiting phase.
    pub fn wake_receiver(&self) -> Receiver<()> {
        self.rx.clone()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
