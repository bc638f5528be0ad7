//! One loaded model engine plus its conversation state and lifecycle FSM.
//! Owned exclusively by its Pool; never shared across Pools.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use uuid::Uuid;

use std::sync::Arc;

use crate::cancel::{CancelReason, CancelToken};
use crate::clock::Clock;
use crate::config::ModelConfig;
use crate::engine::{EngineAdapter, EngineHandle};
use crate::error::PoolError;
use crate::fingerprint::ContextFingerprint;
use crate::task::{TaskHandle, TaskId, TaskRequest};

/// Mirrors the teacher's `WorkerState` (`pool/core/worker_state.rs`): a
/// `#[repr(u32)]` enum with an `AtomicU32` mirror for lock-free matcher
/// reads, and a `From<u32>` round-trip.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    New = 0,
    Preparing = 1,
    Idle = 2,
    Busy = 3,
    PrepareFailed = 4,
    Disposing = 5,
    Disposed = 6,
}

impl From<u32> for InstanceStatus {
    fn from(v: u32) -> Self {
        match v {
            0 => InstanceStatus::New,
            1 => InstanceStatus::Preparing,
            2 => InstanceStatus::Idle,
            3 => InstanceStatus::Busy,
            4 => InstanceStatus::PrepareFailed,
            5 => InstanceStatus::Disposing,
            _ => InstanceStatus::Disposed,
        }
    }
}

impl InstanceStatus {
    /// Counts toward a model's min/maxInstances floor (invariant 1).
    pub fn counts_toward_floor(self) -> bool {
        matches!(
            self,
            InstanceStatus::Preparing | InstanceStatus::Idle | InstanceStatus::Busy
        )
    }
}

struct InstanceInner {
    fingerprint: ContextFingerprint,
    last_used_at: Instant,
    task_seq: u64,
    current_cancel: Option<CancelToken>,
}

pub struct Instance {
    pub uid: Uuid,
    pub config: Arc<ModelConfig>,
    adapter: Arc<dyn EngineAdapter>,
    engine_handle: Mutex<Option<EngineHandle>>,
    inner: Mutex<InstanceInner>,
    status: AtomicU32,
}

impl Instance {
    pub fn new(config: Arc<ModelConfig>, adapter: Arc<dyn EngineAdapter>, clock: &dyn Clock) -> Self {
        Self {
            uid: Uuid::new_v4(),
            config,
            adapter,
            engine_handle: Mutex::new(None),
            inner: Mutex::new(InstanceInner {
                fingerprint: ContextFingerprint::empty(),
                last_used_at: clock.now(),
                task_seq: 0,
                current_cancel: None,
            }),
            status: AtomicU32::new(InstanceStatus::New as u32),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::from(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, s: InstanceStatus) {
        self.status.store(s as u32, Ordering::Release);
    }

    pub fn fingerprint(&self) -> ContextFingerprint {
        self.inner.lock().fingerprint.clone()
    }

    pub fn last_used_at(&self) -> Instant {
        self.inner.lock().last_used_at
    }

    /// Loads the model via the adapter. Called once per instance, outside
    /// any Pool lock. On success the instance becomes Idle with the
    /// fingerprint of its configured initial messages; on failure it
    /// becomes PrepareFailed and the caller must remove it from the table.
    pub fn prepare(&self, clock: &dyn Clock) -> Result<(), PoolError> {
        self.set_status(InstanceStatus::Preparing);
        match self.adapter.prepare(&self.config) {
            Ok(handle) => {
                let fp = self.adapter.resident_fingerprint(&handle);
                *self.engine_handle.lock() = Some(handle);
                {
                    let mut inner = self.inner.lock();
                    inner.fingerprint = fp;
                    inner.last_used_at = clock.now();
                }
                self.set_status(InstanceStatus::Idle);
                log::info!("instance {} for model {} ready", self.uid, self.config.id);
                Ok(())
            }
            Err(e) => {
                self.set_status(InstanceStatus::PrepareFailed);
                log::error!("instance {} for model {} prepare failed: {}", self.uid, self.config.id, e);
                Err(e)
            }
        }
    }

    /// Caller (the Pool, under its table lock) must have already confirmed
    /// this instance was Idle.
    pub(crate) fn mark_busy(&self) {
        self.set_status(InstanceStatus::Busy);
    }

    /// Returns this instance to Idle, recording the fingerprint produced
    /// by the just-finished task and bumping `lastUsedAt` monotonically
    /// (invariant 5).
    pub(crate) fn mark_idle(&self, clock: &dyn Clock) {
        let fp = {
            let handle_guard = self.engine_handle.lock();
            handle_guard
                .as_ref()
                .map(|h| self.adapter.resident_fingerprint(h))
                .unwrap_or_default()
        };
        let mut inner = self.inner.lock();
        inner.fingerprint = fp;
        inner.last_used_at = clock.now();
        inner.current_cancel = None;
        drop(inner);
        self.set_status(InstanceStatus::Idle);
    }

    pub(crate) fn mark_disposing(&self) {
        self.inner.lock().current_cancel = None;
        self.set_status(InstanceStatus::Disposing);
    }

    /// Tolerant of being called on an instance that never finished (or
    /// failed) prepare — `dispose` is only forwarded to the adapter when
    /// there is an actual handle to release, so every instance ends up
    /// Disposed exactly once regardless of how it got there.
    pub(crate) fn dispose(&self) {
        if let Some(handle) = self.engine_handle.lock().take() {
            self.adapter.dispose(handle);
        }
        self.set_status(InstanceStatus::Disposed);
        log::debug!("instance {} for model {} disposed", self.uid, self.config.id);
    }

    /// If this instance is Busy with an in-flight task, fires its current
    /// cancel token with `Shutdown` as the reason.
    pub(crate) fn signal_shutdown_cancel(&self) {
        if let Some(token) = self.inner.lock().current_cancel.clone() {
            token.fire(CancelReason::Shutdown);
        }
    }

    /// Blocks (shutdown path only — not on any hot path) until this
    /// instance is no longer Busy or Preparing.
    pub(crate) fn await_release(&self) {
        while matches!(self.status(), InstanceStatus::Busy | InstanceStatus::Preparing) {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    /// Starts one task on this already-Busy instance.
    pub fn execute(&self, req: TaskRequest, request_seq: u64) -> TaskHandle {
        let cancel = req.cancel.clone().unwrap_or_default();
        let task_seq = {
            let mut inner = self.inner.lock();
            inner.task_seq += 1;
            inner.current_cancel = Some(cancel.clone());
            inner.task_seq
        };
        let id = TaskId {
            request_seq,
            instance_uid: self.uid,
            task_seq,
        };

        if let Some(timeout) = req.timeout {
            let timer_cancel = cancel.clone();
            std::thread::spawn(move || {
                let wake = timer_cancel.wake_receiver();
                crossbeam::select! {
                    recv(wake) -> _ => {}
                    default(timeout) => { timer_cancel.fire(CancelReason::Timeout); }
                }
            });
        }

        let mut handle_guard = self.engine_handle.lock();
        let engine_handle = handle_guard
            .as_mut()
            .expect("execute called before prepare completed");
        let result_rx = self.adapter.process_task(engine_handle, req, cancel.clone());
        drop(handle_guard);

        TaskHandle::new(id, result_rx, cancel)
    }
}
