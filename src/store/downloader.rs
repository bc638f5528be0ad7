//! The external collaborator behind the Store's on-demand download path —
//! this crate's analogue of the Engine Adapter pattern applied to file
//! acquisition instead of inference.

use std::path::Path;

use crate::config::ModelConfig;
use crate::error::StoreError;

pub trait ModelDownloader: Send + Sync + 'static {
    fn download(&self, cfg: &ModelConfig, dest: &Path) -> Result<(), StoreError>;
}

/// Rejects every download; useful when a deployment only ever serves
/// pre-placed model files and wants on-demand downloads to fail loudly.
pub struct NullDownloader;

impl ModelDownloader for NullDownloader {
    fn download(&self, cfg: &ModelConfig, _dest: &Path) -> Result<(), StoreError> {
        Err(StoreError::DownloadFailed(
            cfg.id.clone(),
            "no downloader configured".into(),
        ))
    }
}

/// Downloads `cfg.location` (treated as a `repo/filename` HuggingFace Hub
/// path) via `hf-hub`'s async API, grounded on
/// `domain/model/download/hf_hub_provider.rs::HfHubDownloadProvider`.
/// Bridges the async API into this trait's synchronous call with a
/// single-threaded Tokio runtime, since the Pool/Instance scheduling loop
/// itself never runs inside one.
#[cfg(feature = "download-hf-hub")]
pub struct HfHubDownloader {
    auth_token: Option<String>,
}

#[cfg(feature = "download-hf-hub")]
impl HfHubDownloader {
    pub fn new() -> Self {
        let auth_token = std::env::var("HF_TOKEN")
            .or_else(|_| std::env::var("HUGGING_FACE_HUB_TOKEN"))
            .ok()
            .filter(|s| !s.is_empty());
        Self { auth_token }
    }
}

#[cfg(feature = "download-hf-hub")]
impl Default for HfHubDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "download-hf-hub")]
impl ModelDownloader for HfHubDownloader {
    fn download(&self, cfg: &ModelConfig, dest: &Path) -> Result<(), StoreError> {
        let (repo, filename) = cfg
            .location
            .rsplit_once('/')
            .ok_or_else(|| {
                StoreError::DownloadFailed(
                    cfg.id.clone(),
                    format!("location `{}` is not `repo/filename`", cfg.location),
                )
            })?;
        let repo = repo.to_string();
        let filename = filename.to_string();
        let auth_token = self.auth_token.clone();
        let model_id = cfg.id.clone();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::DownloadFailed(model_id.clone(), e.to_string()))?;

        let fetched = runtime.block_on(async move {
            let mut builder = hf_hub::api::tokio::ApiBuilder::new();
            if let Some(token) = auth_token {
                builder = builder.with_token(Some(token));
            }
            let api = builder
                .build()
                .map_err(|e| StoreError::DownloadFailed(model_id.clone(), e.to_string()))?;
            api.model(repo)
                .get(&filename)
                .await
                .map_err(|e| StoreError::DownloadFailed(model_id.clone(), e.to_string()))
        })?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(cfg.id.clone(), e.to_string()))?;
        }
        std::fs::copy(&fetched, dest).map_err(|e| StoreError::Io(cfg.id.clone(), e.to_string()))?;
        Ok(())
    }
}
