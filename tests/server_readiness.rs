//! Exercises floor preload and on-demand acquire through a *real*
//! `ModelStore` (backed by a temp directory, never pre-marked ready via
//! `mark_ready_for_test`) to pin down the readiness-gating behavior that
//! `pool_scenarios.rs`/`pool_invariants.rs` bypass entirely by calling
//! `mark_ready_for_test` directly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modelhost::engine::EngineAdapter;
use modelhost::store::ModelDownloader;
use modelhost::{
    ChatMessage, Config, MockEngineAdapter, ModelConfig, PrepareMode, Role, Server, StoreError,
    SystemClock, TaskKind, TaskPayload, TaskRequest,
};

/// Writes a small stub file instead of touching the network, counting
/// calls so tests can assert a download actually happened (or didn't).
struct StubDownloader {
    calls: AtomicUsize,
}

impl StubDownloader {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelDownloader for StubDownloader {
    fn download(&self, cfg: &ModelConfig, dest: &Path) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(cfg.id.clone(), e.to_string()))?;
        }
        std::fs::write(dest, b"stub weights").map_err(|e| StoreError::Io(cfg.id.clone(), e.to_string()))
    }
}

fn model_cfg(id: &str, prepare: PrepareMode) -> ModelConfig {
    ModelConfig {
        id: id.into(),
        engine: "mock".into(),
        task: TaskKind::Chat,
        location: format!("{id}.bin"),
        checksum: None,
        min_instances: 1,
        max_instances: 1,
        ttl_secs: 300,
        prepare,
        initial_messages: Vec::new(),
        options: serde_json::Value::Null,
    }
}

fn adapters() -> HashMap<String, Arc<dyn EngineAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    adapters.insert("mock".into(), Arc::new(MockEngineAdapter::new()));
    adapters
}

/// Spec §4.2: "Kicks off downloads for models whose `prepare` is `blocking`
/// or `async`." With a `blocking` model whose file is missing on disk, the
/// Store must go through a real download before `start_with` returns, and
/// the floor must end up prepared rather than skipped or hung.
#[test]
fn blocking_floor_preload_downloads_before_preparing() {
    let dir = tempfile::tempdir().unwrap();
    let global = Config {
        cache_dir: dir.path().to_path_buf(),
        maintenance_interval_secs: 30,
        max_waiters_per_model: None,
    };
    let cfg = model_cfg("m1", PrepareMode::Blocking);
    let mut models = HashMap::new();
    models.insert(cfg.id.clone(), cfg);

    let downloader = Arc::new(StubDownloader::new());
    let server = Server::start_with(
        global,
        models,
        adapters(),
        downloader.clone(),
        Arc::new(SystemClock),
    )
    .expect("server start");

    assert_eq!(downloader.calls(), 1, "blocking floor preload must trigger exactly one download");
    assert!(server.store().is_ready("m1"), "store must be ready after blocking preload");

    // A subsequent acquire must reuse the already-prepared floor instance,
    // not hang or re-download.
    let req = TaskRequest::new(
        TaskKind::Chat,
        "m1",
        TaskPayload::Chat {
            messages: vec![ChatMessage { role: Role::User, content: "hi".into() }],
            stop: Vec::new(),
        },
    );
    let lease = server.acquire(req).expect("acquire after blocking preload");
    lease.release();
    assert_eq!(downloader.calls(), 1, "acquire must not trigger a second download once ready");

    server.stop();
}

/// Same contract for `async`: preload happens on a background thread, but
/// it must still go through the Store's download path rather than calling
/// `adapter.prepare` on a missing file.
#[test]
fn async_floor_preload_downloads_before_preparing() {
    let dir = tempfile::tempdir().unwrap();
    let global = Config {
        cache_dir: dir.path().to_path_buf(),
        maintenance_interval_secs: 30,
        max_waiters_per_model: None,
    };
    let cfg = model_cfg("m1", PrepareMode::Async);
    let mut models = HashMap::new();
    models.insert(cfg.id.clone(), cfg);

    let downloader = Arc::new(StubDownloader::new());
    let server = Server::start_with(
        global,
        models,
        adapters(),
        downloader.clone(),
        Arc::new(SystemClock),
    )
    .expect("server start");

    let req = TaskRequest::new(
        TaskKind::Chat,
        "m1",
        TaskPayload::Chat {
            messages: vec![ChatMessage { role: Role::User, content: "hi".into() }],
            stop: Vec::new(),
        },
    )
    .with_timeout(Duration::from_secs(5));
    let lease = server
        .acquire(req)
        .expect("acquire must eventually succeed once async preload finishes, not hang forever");
    lease.release();
    assert_eq!(downloader.calls(), 1);

    server.stop();
}

/// A download failure during floor preload must surface as a
/// distinguishable `PoolError::Store(StoreError::DownloadFailed(..))`, not
/// a generic `EngineFailure`, and must not silently proceed to call
/// `adapter.prepare` on a file that was never written.
#[test]
fn on_demand_acquire_surfaces_store_download_failure_by_kind() {
    struct FailingDownloader;
    impl ModelDownloader for FailingDownloader {
        fn download(&self, cfg: &ModelConfig, _dest: &Path) -> Result<(), StoreError> {
            Err(StoreError::DownloadFailed(cfg.id.clone(), "network unreachable".into()))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let global = Config {
        cache_dir: dir.path().to_path_buf(),
        maintenance_interval_secs: 30,
        max_waiters_per_model: None,
    };
    let cfg = ModelConfig {
        min_instances: 0,
        ..model_cfg("m1", PrepareMode::OnDemand)
    };
    let mut models = HashMap::new();
    models.insert(cfg.id.clone(), cfg);

    let server = Server::start_with(
        global,
        models,
        adapters(),
        Arc::new(FailingDownloader),
        Arc::new(SystemClock),
    )
    .expect("server start");

    let req = TaskRequest::new(
        TaskKind::Chat,
        "m1",
        TaskPayload::Chat {
            messages: vec![ChatMessage { role: Role::User, content: "hi".into() }],
            stop: Vec::new(),
        },
    );
    let err = server.acquire(req).expect_err("download failure must surface, not hang");
    assert!(
        matches!(err, modelhost::PoolError::Store(StoreError::DownloadFailed(ref id, _)) if id == "m1"),
        "expected a kind-preserving Store(DownloadFailed) error, got {err:?}"
    );

    server.stop();
}
