//! A Lease: the caller-facing handle on one acquired Instance. Exactly one
//! of `release`/`release_failed` should be called once the caller is done;
//! `Drop` performs a normal `release` as a safety net if neither was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::PoolError;
use crate::instance::Instance;
use crate::pool::Pool;
use crate::task::{TaskHandle, TaskRequest};

pub struct Lease {
    pool: Arc<Pool>,
    instance: Arc<Instance>,
    model_id: String,
    request_seq: u64,
    request: Mutex<Option<TaskRequest>>,
    released: AtomicBool,
}

impl Lease {
    pub(crate) fn new(
        pool: Arc<Pool>,
        instance: Arc<Instance>,
        model_id: String,
        request_seq: u64,
        request: TaskRequest,
    ) -> Self {
        Self {
            pool,
            instance,
            model_id,
            request_seq,
            request: Mutex::new(Some(request)),
            released: AtomicBool::new(false),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn instance_uid(&self) -> Uuid {
        self.instance.uid
    }

    /// Runs the request this lease was acquired for. Callable once per
    /// lease — a second call fails rather than silently starting a
    /// duplicate task on a Busy instance.
    pub fn execute(&self) -> Result<TaskHandle, PoolError> {
        let req = self.request.lock().take().ok_or_else(|| {
            PoolError::EngineFailure("task already executed on this lease".into())
        })?;
        Ok(self.instance.execute(req, self.request_seq))
    }

    /// Returns the instance to Idle (or hands it straight to the next
    /// queued waiter).
    pub fn release(self) {
        self.release_inner(false);
    }

    /// Recycles the instance: disposes it and restores the model's floor
    /// if needed, per the `EngineFailure` propagation rule (§7).
    pub fn release_failed(self) {
        self.release_inner(true);
    }

    fn release_inner(&self, failed: bool) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if failed {
            self.pool.release_failed(&self.model_id, self.instance.clone());
        } else {
            self.pool.release(&self.model_id, self.instance.clone());
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release_inner(false);
    }
}
