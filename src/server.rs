//! The thin orchestrator (§4.5): wires one Store and one Pool together and
//! exposes the sequencing `start`/`stop` plus a couple of call-through
//! convenience methods. Intentionally carries no HTTP/CLI surface of its
//! own — that translation layer is explicitly out of scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ModelConfig};
use crate::engine::EngineAdapter;
use crate::error::{ConfigError, PoolError};
use crate::lease::Lease;
use crate::pool::{Pool, PoolConfig};
use crate::store::{ModelDownloader, ModelStore};
use crate::task::{TaskRequest, TaskResult};

pub struct Server {
    pool: Arc<Pool>,
    store: Arc<ModelStore>,
}

impl Server {
    pub fn start(
        global: Config,
        models: HashMap<String, ModelConfig>,
        adapters: HashMap<String, Arc<dyn EngineAdapter>>,
        downloader: Arc<dyn ModelDownloader>,
    ) -> Result<Self, ConfigError> {
        Self::start_with(global, models, adapters, downloader, Arc::new(SystemClock))
    }

    /// Same sequencing as `start`, with an injectable clock for
    /// deterministic tests.
    pub fn start_with(
        global: Config,
        models: HashMap<String, ModelConfig>,
        adapters: HashMap<String, Arc<dyn EngineAdapter>>,
        downloader: Arc<dyn ModelDownloader>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        for cfg in models.values() {
            cfg.validate()?;
        }

        let store = Arc::new(ModelStore::new(global.cache_dir.clone(), downloader));
        for cfg in models.values() {
            if let Err(e) = store.refresh(cfg) {
                log::warn!("initial Store refresh failed for model {}: {}", cfg.id, e);
            }
        }

        let pool_config = PoolConfig {
            max_waiters_per_model: global.max_waiters_per_model,
            maintenance_interval: Duration::from_secs(global.maintenance_interval_secs.max(1)),
        };

        let pool = Pool::new(models, adapters, store.clone(), clock, pool_config)?;
        pool.start_maintenance();
        pool.prepare_all_floors_blocking();
        pool.prepare_all_floors_async();

        Ok(Self { pool, store })
    }

    /// Drains the Pool (§4.4.5) then stops the maintenance thread.
    pub fn stop(&self) {
        self.pool.stop();
    }

    pub fn acquire(&self, req: TaskRequest) -> Result<Lease, PoolError> {
        self.pool.acquire(req)
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Acquire, execute, and release in one call for callers that don't
    /// need streaming (§4.5's "small set of convenience methods").
    pub fn run_task_blocking(&self, req: TaskRequest) -> Result<TaskResult, PoolError> {
        let lease = self.pool.acquire(req)?;
        let mut handle = lease.execute()?;
        let result = handle.result_blocking();
        match &result {
            Err(PoolError::EngineFailure(_)) => lease.release_failed(),
            _ => lease.release(),
        }
        result
    }
}
