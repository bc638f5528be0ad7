//! Error taxonomy. Kind naming follows the teacher's `pool::core::error::PoolError`;
//! the derive style follows `domain::engine::LocalEngineError` and
//! `pool::core::memory_governor::MemoryError`, both `thiserror`-derived
//! within the same package.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PoolError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("model not ready: {0}")]
    ModelNotReady(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("capacity exhausted for model {0}")]
    CapacityExhausted(String),

    #[error("pool is shutting down")]
    ShuttingDown,

    #[error("engine failure: {0}")]
    EngineFailure(String),

    /// Wraps a [`StoreError`] verbatim so callers can still match on its
    /// kind (e.g. `ChecksumMismatch`) instead of collapsing every Store
    /// failure into an opaque string (§7: "distinguishable by kind, not
    /// message").
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("checksum mismatch for {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("download failed for {0}: {1}")]
    DownloadFailed(String, String),

    #[error("io error for {0}: {1}")]
    Io(String, String),
}

#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("model {id}: minInstances ({min}) must be <= maxInstances ({max})")]
    InvalidBounds { id: String, min: usize, max: usize },

    #[error("model {id}: maxInstances must be >= 1")]
    ZeroCapacity { id: String },

    #[error("model {id}: no adapter registered for engine `{engine}`")]
    UnknownEngine { id: String, engine: String },
}
