//! End-to-end scenarios S1-S6 against a scriptable `MockEngineAdapter`
//! and a `ManualClock`, so TTL/ordering assertions don't depend on
//! fragile wall-clock sleeps beyond the ones the task payloads
//! themselves introduce (token delays, explicit timeouts).

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use modelhost::{
    ChatMessage, FinishReason, ManualClock, MockEngineAdapter, ModelConfig, NullDownloader,
    Pool, PoolConfig, PrepareMode, Role, TaskKind, TaskOutput, TaskPayload, TaskRequest,
};
use modelhost::engine::EngineAdapter;
use modelhost::store::ModelStore;

fn model_cfg(id: &str, min: usize, max: usize, ttl_secs: u64, prepare: PrepareMode) -> ModelConfig {
    ModelConfig {
        id: id.into(),
        engine: "mock".into(),
        task: TaskKind::Chat,
        location: format!("{id}.bin"),
        checksum: None,
        min_instances: min,
        max_instances: max,
        ttl_secs,
        prepare,
        initial_messages: Vec::new(),
        options: serde_json::Value::Null,
    }
}

fn chat_req(model_id: &str, messages: Vec<ChatMessage>, stop: Vec<String>) -> TaskRequest {
    TaskRequest::new(TaskKind::Chat, model_id, TaskPayload::Chat { messages, stop })
}

fn user(content: &str) -> ChatMessage {
    ChatMessage { role: Role::User, content: content.into() }
}

fn assistant(content: &str) -> ChatMessage {
    ChatMessage { role: Role::Assistant, content: content.into() }
}

fn build_pool(
    cfg: ModelConfig,
    adapter: MockEngineAdapter,
    clock: Arc<ManualClock>,
    maintenance_interval: Duration,
) -> (Arc<Pool>, Arc<MockEngineAdapter>) {
    let store = Arc::new(ModelStore::new(std::env::temp_dir(), Arc::new(NullDownloader)));
    store.mark_ready_for_test(&cfg.id, &cfg.engine);

    let adapter = Arc::new(adapter);
    let mut adapters: HashMap<String, Arc<dyn EngineAdapter>> = HashMap::new();
    adapters.insert("mock".into(), adapter.clone());

    let mut configs = HashMap::new();
    configs.insert(cfg.id.clone(), cfg);

    let pool_cfg = PoolConfig { max_waiters_per_model: None, maintenance_interval };
    let pool = Pool::new(configs, adapters, store, clock, pool_cfg).expect("pool construction");
    (pool, adapter)
}

fn chat_content(output: TaskOutput) -> String {
    match output {
        TaskOutput::Chat { content, .. } => content,
        other => panic!("expected chat output, got {other:?}"),
    }
}

/// S1 (reuse). A released instance's resident fingerprint is re-selected
/// by a later request whose messages are a true prefix extension of it,
/// while a concurrently acquired second request lands on a different
/// instance (invariant 4).
#[test]
fn s1_prefix_reuse_selects_same_instance() {
    let clock = Arc::new(ManualClock::new());
    let (pool, _adapter) = build_pool(
        model_cfg("test", 0, 2, 60, PrepareMode::OnDemand),
        MockEngineAdapter::new().with_token_delay(Duration::from_millis(0)),
        clock,
        Duration::from_secs(3600),
    );

    let lease_a = pool.acquire(chat_req("test", vec![user("U1")], vec![])).expect("acquire a");

    let pool_for_b = Arc::clone(&pool);
    let lease_b = thread::spawn(move || {
        pool_for_b
            .acquire(chat_req("test", vec![user("U2")], vec![]))
            .expect("acquire b")
    })
    .join()
    .expect("join b");

    assert_ne!(lease_a.instance_uid(), lease_b.instance_uid(), "A is Busy, B must land elsewhere");

    let uid_a = lease_a.instance_uid();
    let mut handle_a = lease_a.execute().expect("execute a");
    let result_a = handle_a.result_blocking().expect("result a");
    let reply_a = chat_content(result_a.output);
    assert_eq!(reply_a, "echo U1");
    lease_a.release();
    lease_b.release();

    let messages_c = vec![user("U1"), assistant(&reply_a), user("U2")];
    let lease_c = pool.acquire(chat_req("test", messages_c, vec![])).expect("acquire c");
    assert_eq!(lease_c.instance_uid(), uid_a, "prefix match must reuse A's instance");
}

/// S2 (TTL eviction). An above-floor Idle instance whose simulated idle
/// time exceeds its TTL is disposed by the maintenance sweep exactly
/// once; the following acquire triggers a fresh prepare.
#[test]
fn s2_ttl_eviction_disposes_once_and_reprepares() {
    let clock = Arc::new(ManualClock::new());
    let (pool, adapter) = build_pool(
        model_cfg("test", 0, 1, 1, PrepareMode::OnDemand),
        MockEngineAdapter::new(),
        clock.clone(),
        Duration::from_millis(20),
    );
    pool.start_maintenance();

    let lease = pool.acquire(chat_req("test", vec![user("hi")], vec![])).expect("acquire");
    lease.release();
    assert_eq!(adapter.prepare_calls(), 1);

    clock.advance(Duration::from_secs(5));
    thread::sleep(Duration::from_millis(150));

    assert_eq!(adapter.dispose_calls(), 1, "TTL sweep must dispose exactly once");

    let lease2 = pool.acquire(chat_req("test", vec![user("hi again")], vec![])).expect("reacquire");
    lease2.release();
    assert_eq!(adapter.prepare_calls(), 2, "a fresh instance must be prepared");
}

/// S3 (timeout). A request with an explicit timeout shorter than the
/// mock's total generation time is cut off with `finishReason = timeout`
/// and whatever partial content had already been produced.
#[test]
fn s3_timeout_yields_partial_content() {
    let clock = Arc::new(ManualClock::new());
    let (pool, _adapter) = build_pool(
        model_cfg("test", 0, 1, 60, PrepareMode::OnDemand),
        MockEngineAdapter::new()
            .with_tokens_per_reply(50)
            .with_token_delay(Duration::from_millis(60)),
        clock,
        Duration::from_secs(3600),
    );

    let req = chat_req("test", vec![user("tell me a long story")], vec![])
        .with_timeout(Duration::from_millis(150));
    let lease = pool.acquire(req).expect("acquire");
    let mut handle = lease.execute().expect("execute");
    let result = handle.result_blocking().expect("result");
    assert_eq!(result.finish_reason, FinishReason::Timeout);
    assert!(!chat_content(result.output).is_empty());
    lease.release();
}

/// S4 (cancel). Calling `cancel()` mid-generation stops it early with
/// `finishReason = cancel` and non-empty partial content; calling
/// `cancel()` again afterward is a no-op (invariant 5).
#[test]
fn s4_cancel_yields_partial_content_and_is_idempotent() {
    let clock = Arc::new(ManualClock::new());
    let (pool, _adapter) = build_pool(
        model_cfg("test", 0, 1, 60, PrepareMode::OnDemand),
        MockEngineAdapter::new()
            .with_tokens_per_reply(50)
            .with_token_delay(Duration::from_millis(60)),
        clock,
        Duration::from_secs(3600),
    );

    let cancel = modelhost::CancelToken::new();
    let req = chat_req("test", vec![user("tell me a long story")], vec![]).with_cancel(cancel.clone());
    let lease = pool.acquire(req).expect("acquire");
    let mut handle = lease.execute().expect("execute");

    thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        cancel.fire(modelhost::CancelReason::Caller);
    });

    let result = handle.result_blocking().expect("result");
    assert_eq!(result.finish_reason, FinishReason::Cancel);
    assert!(!chat_content(result.output).is_empty());

    handle.cancel();
    handle.cancel();
    lease.release();
}

/// S5 (stop trigger). A configured stop string truncates generation
/// before the stop-triggering word is ever appended to the output.
#[test]
fn s5_stop_trigger_excludes_stop_word_from_content() {
    let clock = Arc::new(ManualClock::new());
    let (pool, _adapter) = build_pool(
        model_cfg("test", 0, 1, 60, PrepareMode::OnDemand),
        MockEngineAdapter::new().with_token_delay(Duration::from_millis(0)),
        clock,
        Duration::from_secs(3600),
    );

    let req = chat_req("test", vec![user("OK")], vec!["OK".to_string()]);
    let lease = pool.acquire(req).expect("acquire");
    let mut handle = lease.execute().expect("execute");
    let result = handle.result_blocking().expect("result");
    assert_eq!(result.finish_reason, FinishReason::StopTrigger);
    let content = chat_content(result.output);
    assert!(!content.contains("OK"), "stop word must not appear in content, got {content:?}");
    lease.release();
}

/// S6 (floor preload). With `minInstances: 2, prepare: blocking`, the
/// floor is fully warmed before the caller does anything else.
#[test]
fn s6_floor_preload_warms_min_instances_before_any_acquire() {
    let clock = Arc::new(ManualClock::new());
    let (pool, adapter) = build_pool(
        model_cfg("test", 2, 2, 60, PrepareMode::Blocking),
        MockEngineAdapter::new(),
        clock,
        Duration::from_secs(3600),
    );

    pool.prepare_all_floors_blocking();
    assert_eq!(adapter.prepare_calls(), 2, "floor must be warmed to minInstances before any acquire");
}
