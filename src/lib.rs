//! Instance Pool and Task Scheduler for a local, multi-engine inference
//! server. The crate owns model lifecycle (load/idle/evict), request
//! matching against resident conversation state, and task cancellation —
//! it does not ship an HTTP surface, a CLI, or any concrete model engine;
//! callers bring their own [`engine::EngineAdapter`] implementations.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod instance;
pub mod lease;
pub mod pool;
pub mod server;
pub mod store;
pub mod task;

pub use cancel::{CancelReason, CancelToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ModelConfig, PrepareMode};
pub use engine::{EngineAdapter, EngineHandle};
pub use error::{ConfigError, PoolError, StoreError};
pub use fingerprint::ContextFingerprint;
pub use instance::{Instance, InstanceStatus};
pub use lease::Lease;
pub use pool::{Pool, PoolConfig};
pub use server::Server;
pub use store::{ModelDownloader, ModelStatus, ModelStore, NullDownloader};
pub use task::{
    ChatMessage, FinishReason, Role, TaskChunk, TaskHandle, TaskId, TaskKind, TaskOutput,
    TaskPayload, TaskRequest, TaskResult, ToolCall,
};

#[cfg(any(test, feature = "test-util"))]
pub use engine::MockEngineAdapter;
