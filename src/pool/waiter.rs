//! A single queued `acquire` request, parked on its model's FIFO waiter
//! queue until it is granted an instance, cancelled, timed out, or swept
//! aside by shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::cancel::CancelToken;
use crate::error::PoolError;
use crate::instance::Instance;

/// Exactly one of `grant`/`grant_shutdown_error`/the waiting thread's own
/// cancel-path claim succeeds per waiter; `resolved` is the single
/// arbitration point between the release side (handing off an instance)
/// and the wait side (giving up on cancel/timeout).
pub(crate) struct Waiter {
    tx: Sender<Result<Arc<Instance>, PoolError>>,
    rx: Receiver<Result<Arc<Instance>, PoolError>>,
    cancel: CancelToken,
    resolved: AtomicBool,
}

impl Waiter {
    pub(crate) fn new(cancel: CancelToken) -> Arc<Self> {
        let (tx, rx) = bounded(1);
        Arc::new(Self {
            tx,
            rx,
            cancel,
            resolved: AtomicBool::new(false),
        })
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn receiver(&self) -> Receiver<Result<Arc<Instance>, PoolError>> {
        self.rx.clone()
    }

    /// Called from the release side. Returns `false` if this waiter was
    /// already claimed (cancelled/timed out) concurrently, in which case
    /// the caller must try the next waiter instead.
    pub(crate) fn grant(&self, instance: Arc<Instance>) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.send(Ok(instance)).is_ok()
    }

    /// Called during shutdown drain. Same arbitration as `grant`.
    pub(crate) fn grant_shutdown_error(&self) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.send(Err(PoolError::ShuttingDown)).is_ok()
    }

    /// Called from the waiting thread itself when its cancel/timeout fires
    /// first. Returns `true` if this side won the race (so the caller
    /// should report `Cancelled`/`Timeout` without waiting on the channel).
    pub(crate) fn claim(&self) -> bool {
        !self.resolved.swap(true, Ordering::AcqRel)
    }
}
