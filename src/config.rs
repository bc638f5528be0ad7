//! Global and per-model configuration, deserializable so a caller can load
//! it from whatever file format it likes (TOML/JSON/YAML are all just
//! `serde::Deserialize` targets — this crate makes no format assumption).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::task::{ChatMessage, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrepareMode {
    /// `Server::start` blocks until the model's floor is preloaded.
    Blocking,
    /// Floor preload runs on a background thread; `start` returns immediately.
    Async,
    /// No instances are created at startup; the first `acquire` triggers
    /// download + prepare.
    OnDemand,
}

impl Default for PrepareMode {
    fn default() -> Self {
        PrepareMode::OnDemand
    }
}

fn default_min_instances() -> usize {
    0
}

fn default_max_instances() -> usize {
    1
}

fn default_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub engine: String,
    pub task: TaskKind,
    pub location: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default = "default_min_instances")]
    pub min_instances: usize,
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub prepare: PrepareMode,
    #[serde(default)]
    pub initial_messages: Vec<ChatMessage>,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 {
            return Err(ConfigError::ZeroCapacity { id: self.id.clone() });
        }
        if self.min_instances > self.max_instances {
            return Err(ConfigError::InvalidBounds {
                id: self.id.clone(),
                min: self.min_instances,
                max: self.max_instances,
            });
        }
        Ok(())
    }
}

fn default_maintenance_interval_secs() -> u64 {
    30
}

/// Global settings shared by every model (cache location, concurrency
/// caps, default sweep cadence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cache_dir: PathBuf,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    #[serde(default)]
    pub max_waiters_per_model: Option<usize>,
}
