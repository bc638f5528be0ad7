//! Model Store: on-disk presence/checksum tracking and on-demand download
//! coordination. The actual network transfer is delegated to an injected
//! [`ModelDownloader`] (this crate's analogue of the teacher's
//! `acquire_download_lock`/download-provider split).

mod downloader;

#[cfg(feature = "download-hf-hub")]
pub use downloader::HfHubDownloader;
pub use downloader::{ModelDownloader, NullDownloader};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::config::ModelConfig;
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct ModelStatus {
    pub engine: String,
    pub ready: bool,
    pub size_bytes: u64,
}

/// Mirrors the teacher's `Pool::workers: DashMap<String, Vec<WorkerHandle>>`
/// table pattern, keyed by model id instead of capability.
pub struct ModelStore {
    cache_dir: PathBuf,
    statuses: DashMap<String, ModelStatus>,
    downloader: Arc<dyn ModelDownloader>,
}

impl ModelStore {
    pub fn new(cache_dir: impl Into<PathBuf>, downloader: Arc<dyn ModelDownloader>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            statuses: DashMap::new(),
            downloader,
        }
    }

    pub fn path_for(&self, cfg: &ModelConfig) -> PathBuf {
        self.cache_dir.join("models").join(&cfg.location)
    }

    fn sentinel_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".downloading");
        PathBuf::from(name)
    }

    /// Validates on-disk presence and (if configured) checksum, refreshing
    /// the cached status. A sentinel found without a live download in
    /// progress is treated as incomplete, never silently trusted.
    pub fn refresh(&self, cfg: &ModelConfig) -> Result<ModelStatus, StoreError> {
        let path = self.path_for(cfg);
        let sentinel = Self::sentinel_for(&path);

        if !path.exists() {
            let status = ModelStatus {
                engine: cfg.engine.clone(),
                ready: false,
                size_bytes: 0,
            };
            self.statuses.insert(cfg.id.clone(), status.clone());
            return Ok(status);
        }

        let size_bytes = std::fs::metadata(&path)
            .map_err(|e| StoreError::Io(cfg.id.clone(), e.to_string()))?
            .len();

        if let Some(expected) = &cfg.checksum {
            let actual = Self::sha256_hex(&path)?;
            if &actual != expected {
                return Err(StoreError::ChecksumMismatch {
                    id: cfg.id.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let ready = !sentinel.exists();
        let status = ModelStatus {
            engine: cfg.engine.clone(),
            ready,
            size_bytes,
        };
        self.statuses.insert(cfg.id.clone(), status.clone());
        Ok(status)
    }

    fn sha256_hex(path: &Path) -> Result<String, StoreError> {
        let bytes = std::fs::read(path)
            .map_err(|e| StoreError::Io(path.display().to_string(), e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Test-only shortcut: marks a model ready without touching the
    /// filesystem, so Pool/Server tests can focus on scheduling rather
    /// than on Store mechanics already covered by this module's own
    /// tests. Gated the same way as `MockEngineAdapter` so integration
    /// tests in `tests/` can reach it via the `test-util` feature.
    #[cfg(any(test, feature = "test-util"))]
    pub fn mark_ready_for_test(&self, model_id: &str, engine: &str) {
        self.statuses.insert(
            model_id.to_string(),
            ModelStatus {
                engine: engine.to_string(),
                ready: true,
                size_bytes: 0,
            },
        );
    }

    pub fn is_ready(&self, model_id: &str) -> bool {
        self.statuses.get(model_id).map(|s| s.ready).unwrap_or(false)
    }

    pub fn get_status(&self) -> std::collections::HashMap<String, ModelStatus> {
        self.statuses
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Performs (or re-validates) a download for a not-yet-ready model,
    /// blocking the calling thread. Writes a sentinel sidecar before the
    /// download and removes it after, per spec §6's on-disk contract.
    pub fn ensure_downloaded(&self, cfg: &ModelConfig) -> Result<ModelStatus, StoreError> {
        let path = self.path_for(cfg);
        let sentinel = Self::sentinel_for(&path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(cfg.id.clone(), e.to_string()))?;
        }
        std::fs::write(&sentinel, b"")
            .map_err(|e| StoreError::Io(cfg.id.clone(), e.to_string()))?;

        let result = self.downloader.download(cfg, &path);
        let _ = std::fs::remove_file(&sentinel);
        result?;
        self.refresh(cfg)
    }
}
