//! The Engine Adapter contract (spec §4.1). Concrete model engines
//! (llama.cpp-style, diffusion, embedding, etc.) are opaque behind this
//! trait — the Pool and Instance never reach past it.

#[cfg(any(test, feature = "test-util"))]
mod mock;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockEngineAdapter;

use crate::cancel::CancelToken;
use crate::config::ModelConfig;
use crate::error::PoolError;
use crate::fingerprint::ContextFingerprint;
use crate::task::{AdapterResultRx, TaskKind, TaskRequest};

/// Type-erased engine-owned state (a loaded model, a KV cache, whatever
/// the concrete adapter needs). Erasing it here lets `Pool`/`Instance`
/// stay non-generic and host many different engines in one table.
pub struct EngineHandle(Box<dyn std::any::Any + Send>);

impl EngineHandle {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.0.downcast_mut()
    }
}

pub trait EngineAdapter: Send + Sync + 'static {
    /// Loads whatever the model needs (weights, tokenizer, ...). Called
    /// once per Instance, outside any Pool lock.
    fn prepare(&self, cfg: &ModelConfig) -> Result<EngineHandle, PoolError>;

    /// Starts one inference task and returns immediately; the adapter owns
    /// whatever thread/async mechanism fulfils the result slot later.
    fn process_task(
        &self,
        handle: &mut EngineHandle,
        req: TaskRequest,
        cancel: CancelToken,
    ) -> AdapterResultRx;

    /// Releases engine-owned resources. Called at most once per handle.
    fn dispose(&self, handle: EngineHandle);

    fn task_kinds_supported(&self) -> &'static [TaskKind];

    /// The fingerprint of the conversation state currently resident in
    /// `handle`, used by the Pool's matcher and recomputed on every
    /// release. Stateless engines can leave this as the default.
    fn resident_fingerprint(&self, _handle: &EngineHandle) -> ContextFingerprint {
        ContextFingerprint::empty()
    }

    /// Drops any resident conversation state without disposing the
    /// instance, e.g. to reuse a loaded model for an unrelated
    /// conversation. Default is a no-op for engines with no such state.
    fn reset_context(&self, _handle: &mut EngineHandle) {}
}
