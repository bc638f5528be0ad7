//! The Pool: owns every Instance for every configured model, runs the
//! matcher (§4.4.1), the per-model FIFO waiter queues, floor maintenance,
//! and shutdown drain. See `maintenance.rs` for the TTL sweep thread and
//! `waiter.rs` for the queued-request primitive.

mod maintenance;
mod waiter;

pub(crate) use maintenance::MaintenanceHandle;
use waiter::Waiter;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::{ModelConfig, PrepareMode};
use crate::engine::EngineAdapter;
use crate::error::{ConfigError, PoolError};
use crate::fingerprint::ContextFingerprint;
use crate::instance::{Instance, InstanceStatus};
use crate::lease::Lease;
use crate::store::ModelStore;
use crate::task::TaskRequest;

struct ModelSlot {
    config: Arc<ModelConfig>,
    adapter: Arc<dyn EngineAdapter>,
    instances: Vec<Arc<Instance>>,
    waiters: VecDeque<Arc<Waiter>>,
}

struct PoolTable {
    models: HashMap<String, ModelSlot>,
}

/// Bounds and cadence that apply across every model, separate from each
/// model's own `ModelConfig` (mirrors `pool::core::types::PoolConfig`'s
/// role as a cross-cutting bounded-capacity default).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_waiters_per_model: Option<usize>,
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_waiters_per_model: None,
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

/// Owns all instances for all configured models behind a single mutex
/// (§5): the lock only ever guards map/FSM bookkeeping, never an adapter
/// call.
pub struct Pool {
    table: Mutex<PoolTable>,
    store: Arc<ModelStore>,
    clock: Arc<dyn Clock>,
    shutting_down: AtomicBool,
    next_request_seq: AtomicU64,
    config: PoolConfig,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl Pool {
    pub fn new(
        configs: HashMap<String, ModelConfig>,
        adapters: HashMap<String, Arc<dyn EngineAdapter>>,
        store: Arc<ModelStore>,
        clock: Arc<dyn Clock>,
        config: PoolConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        let mut models = HashMap::new();
        for (id, cfg) in configs {
            cfg.validate()?;
            let adapter = adapters.get(&cfg.engine).cloned().ok_or_else(|| {
                ConfigError::UnknownEngine {
                    id: id.clone(),
                    engine: cfg.engine.clone(),
                }
            })?;
            models.insert(
                id,
                ModelSlot {
                    config: Arc::new(cfg),
                    adapter,
                    instances: Vec::new(),
                    waiters: VecDeque::new(),
                },
            );
        }
        Ok(Arc::new(Self {
            table: Mutex::new(PoolTable { models }),
            store,
            clock,
            shutting_down: AtomicBool::new(false),
            next_request_seq: AtomicU64::new(1),
            config,
            maintenance: Mutex::new(None),
        }))
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// §4.4.1: readiness (store) → prefix-match reuse → spawn below cap →
    /// queue as a FIFO waiter. Loops back to step one after an on-demand
    /// download or a readiness poll.
    pub fn acquire(self: &Arc<Self>, req: TaskRequest) -> Result<Lease, PoolError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown);
        }
        let request_seq = self.next_request_seq.fetch_add(1, Ordering::Relaxed);
        let request_fp = req.request_fingerprint();

        loop {
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(PoolError::ShuttingDown);
            }

            if !self.store.is_ready(&req.model_id) {
                let cfg = {
                    let table = self.table.lock();
                    table
                        .models
                        .get(&req.model_id)
                        .ok_or_else(|| PoolError::UnknownModel(req.model_id.clone()))?
                        .config
                        .clone()
                };
                // Every prepare mode converges on the same recovery: kick
                // off (or join) a download and re-poll. `Blocking`/`Async`
                // floor warm-up already calls `ensure_downloaded` from
                // `restore_floor`, so this is normally a no-op join; it
                // also covers a model whose floor warm-up hasn't run yet
                // (minInstances == 0) or raced ahead of this acquire.
                self.store.ensure_downloaded(&cfg)?;
                continue;
            }

            enum Decision {
                Use(Arc<Instance>),
                Spawn(Arc<Instance>),
                Wait(Arc<Waiter>),
            }

            let decision = {
                let mut table = self.table.lock();
                let slot = table
                    .models
                    .get_mut(&req.model_id)
                    .ok_or_else(|| PoolError::UnknownModel(req.model_id.clone()))?;

                if let Some(inst) = pick_idle_prefix_match(&slot.instances, &request_fp) {
                    inst.mark_busy();
                    Decision::Use(inst)
                } else if slot.instances.len() < slot.config.max_instances {
                    // The capacity check and the reservation (pushing the
                    // new instance into the table) must happen under the
                    // same lock acquisition: releasing the lock in between
                    // would let two concurrent acquirers both observe room
                    // and jointly exceed maxInstances. `Instance::new` is
                    // cheap bookkeeping only, never an adapter call, so
                    // it's safe to do while holding the table lock; the
                    // actual (possibly slow) `prepare()` call happens below
                    // after the lock is dropped.
                    let inst = Arc::new(Instance::new(
                        slot.config.clone(),
                        slot.adapter.clone(),
                        self.clock.as_ref(),
                    ));
                    slot.instances.push(inst.clone());
                    Decision::Spawn(inst)
                } else {
                    if let Some(max_waiters) = self.config.max_waiters_per_model {
                        if slot.waiters.len() >= max_waiters {
                            log::warn!(
                                "model {} at capacity, waiter queue full ({})",
                                req.model_id, max_waiters
                            );
                            return Err(PoolError::CapacityExhausted(req.model_id.clone()));
                        }
                    }
                    let cancel = req.cancel.clone().unwrap_or_default();
                    let waiter = Waiter::new(cancel);
                    slot.waiters.push_back(waiter.clone());
                    log::debug!("model {} at capacity, queued waiter (depth {})", req.model_id, slot.waiters.len());
                    Decision::Wait(waiter)
                }
            };

            match decision {
                Decision::Use(inst) => {
                    return Ok(Lease::new(
                        Arc::clone(self),
                        inst,
                        req.model_id.clone(),
                        request_seq,
                        req,
                    ))
                }
                Decision::Spawn(inst) => {
                    // `inst` is already reserved in the table (pushed under
                    // the same lock as the capacity check above); only the
                    // adapter call itself happens out here, unlocked.
                    match inst.prepare(self.clock.as_ref()) {
                        Ok(()) => {
                            inst.mark_busy();
                            return Ok(Lease::new(
                                Arc::clone(self),
                                inst,
                                req.model_id.clone(),
                                request_seq,
                                req,
                            ));
                        }
                        Err(e) => {
                            {
                                let mut table = self.table.lock();
                                if let Some(slot) = table.models.get_mut(&req.model_id) {
                                    slot.instances.retain(|i| !Arc::ptr_eq(i, &inst));
                                }
                            }
                            inst.dispose();
                            log::warn!("spawn failed for model {}: {}", req.model_id, e);
                            self.restore_floor(&req.model_id);
                            return Err(e);
                        }
                    }
                }
                Decision::Wait(waiter) => return self.wait_for_instance(waiter, req, request_seq),
            }
        }
    }

    fn wait_for_instance(
        self: &Arc<Self>,
        waiter: Arc<Waiter>,
        req: TaskRequest,
        request_seq: u64,
    ) -> Result<Lease, PoolError> {
        let granted_rx = waiter.receiver();
        let wake = waiter.cancel_token().wake_receiver();

        let granted: Option<Result<Arc<Instance>, PoolError>>;
        let mut timed_out = false;

        match req.timeout {
            Some(timeout) => {
                crossbeam::select! {
                    recv(granted_rx) -> msg => { granted = msg.ok(); }
                    recv(wake) -> _ => { granted = None; }
                    default(timeout) => { granted = None; timed_out = true; }
                }
            }
            None => {
                crossbeam::select! {
                    recv(granted_rx) -> msg => { granted = msg.ok(); }
                    recv(wake) -> _ => { granted = None; }
                }
            }
        }

        if let Some(result) = granted {
            return result.map(|inst| {
                Lease::new(Arc::clone(self), inst, req.model_id.clone(), request_seq, req)
            });
        }

        if waiter.claim() {
            self.remove_waiter(&req.model_id, &waiter);
            return Err(if timed_out {
                PoolError::Timeout(req.timeout.unwrap_or_default())
            } else {
                PoolError::Cancelled
            });
        }

        // Lost the claim race: a grant (or shutdown error) is already in
        // flight on the channel; consume it rather than report a stale
        // cancel/timeout.
        match granted_rx.recv() {
            Ok(result) => result.map(|inst| {
                Lease::new(Arc::clone(self), inst, req.model_id.clone(), request_seq, req)
            }),
            Err(_) => Err(PoolError::EngineFailure(
                "waiter channel closed without a result".into(),
            )),
        }
    }

    fn remove_waiter(&self, model_id: &str, waiter: &Arc<Waiter>) {
        let mut table = self.table.lock();
        if let Some(slot) = table.models.get_mut(model_id) {
            slot.waiters.retain(|w| !Arc::ptr_eq(w, waiter));
        }
    }

    /// Returns an instance to Idle and hands it to the next queued waiter
    /// if one exists, per §4.4.1 step 7.
    pub(crate) fn release(self: &Arc<Self>, model_id: &str, instance: Arc<Instance>) {
        instance.mark_idle(self.clock.as_ref());
        log::debug!("instance {} for model {} released", instance.uid, model_id);
        self.try_handoff_or_idle(model_id, instance);
    }

    /// An `EngineFailure` path: the instance is recycled (disposed, not
    /// returned to Idle), and the floor is restored if it dropped below
    /// `minInstances`.
    pub(crate) fn release_failed(self: &Arc<Self>, model_id: &str, instance: Arc<Instance>) {
        log::warn!("instance {} for model {} recycled after engine failure", instance.uid, model_id);
        instance.mark_disposing();
        instance.dispose();
        {
            let mut table = self.table.lock();
            if let Some(slot) = table.models.get_mut(model_id) {
                slot.instances.retain(|i| !Arc::ptr_eq(i, &instance));
            }
        }
        self.restore_floor(model_id);
    }

    fn try_handoff_or_idle(&self, model_id: &str, instance: Arc<Instance>) {
        loop {
            let waiter = {
                let mut table = self.table.lock();
                match table.models.get_mut(model_id) {
                    Some(slot) => slot.waiters.pop_front(),
                    None => return,
                }
            };
            match waiter {
                Some(w) => {
                    instance.mark_busy();
                    if w.grant(instance.clone()) {
                        return;
                    }
                    // Waiter self-resolved (cancel/timeout) before the
                    // grant landed; undo the speculative busy mark and
                    // try the next one in line.
                    instance.mark_idle(self.clock.as_ref());
                }
                None => return,
            }
        }
    }

    /// Creates instances until the model is back at `minInstances`. Used
    /// both at startup (via `prepare_all_floors_*`) and after an eviction
    /// or `EngineFailure` drops a model below its floor.
    pub(crate) fn restore_floor(self: &Arc<Self>, model_id: &str) {
        loop {
            let needs_spawn = {
                let table = self.table.lock();
                match table.models.get(model_id) {
                    Some(slot) => {
                        let alive = slot
                            .instances
                            .iter()
                            .filter(|i| i.status().counts_toward_floor())
                            .count();
                        alive < slot.config.min_instances
                    }
                    None => false,
                }
            };
            if !needs_spawn {
                return;
            }
            if self.spawn_one(model_id).is_err() {
                return;
            }
        }
    }

    /// Spawns one instance for `model_id`, first making sure the Model
    /// Store actually has the weights on disk (§6): a floor restore for a
    /// `blocking`/`async` model must not hand an unvalidated or
    /// still-downloading path to the adapter's `prepare`, the same hazard
    /// `acquire`'s readiness check guards against for on-demand callers.
    fn spawn_one(self: &Arc<Self>, model_id: &str) -> Result<(), PoolError> {
        loop {
            let (cfg, adapter, ready, has_room) = {
                let table = self.table.lock();
                let slot = table
                    .models
                    .get(model_id)
                    .ok_or_else(|| PoolError::UnknownModel(model_id.to_string()))?;
                (
                    slot.config.clone(),
                    slot.adapter.clone(),
                    self.store.is_ready(model_id),
                    slot.instances.len() < slot.config.max_instances,
                )
            };

            if !has_room {
                return Err(PoolError::CapacityExhausted(model_id.to_string()));
            }

            if !ready {
                self.store.ensure_downloaded(&cfg)?;
                continue;
            }

            // Re-check capacity while reserving the slot, under the same
            // lock acquisition: another spawner (an `acquire` call or a
            // concurrent `restore_floor`) may have filled the remaining
            // room while this thread was downloading above.
            let reserved = {
                let mut table = self.table.lock();
                match table.models.get_mut(model_id) {
                    Some(slot) if slot.instances.len() < slot.config.max_instances => {
                        let inst = Arc::new(Instance::new(cfg, adapter, self.clock.as_ref()));
                        slot.instances.push(inst.clone());
                        Some(inst)
                    }
                    Some(_) => None,
                    None => return Err(PoolError::UnknownModel(model_id.to_string())),
                }
            };

            let inst = match reserved {
                Some(inst) => inst,
                None => return Err(PoolError::CapacityExhausted(model_id.to_string())),
            };

            return match inst.prepare(self.clock.as_ref()) {
                Ok(()) => Ok(()),
                Err(e) => {
                    {
                        let mut table = self.table.lock();
                        if let Some(slot) = table.models.get_mut(model_id) {
                            slot.instances.retain(|i| !Arc::ptr_eq(i, &inst));
                        }
                    }
                    inst.dispose();
                    Err(e)
                }
            };
        }
    }

    /// Blocks until every `prepare: blocking` model's floor is Idle.
    pub fn prepare_all_floors_blocking(self: &Arc<Self>) {
        let model_ids: Vec<String> = {
            let table = self.table.lock();
            table
                .models
                .iter()
                .filter(|(_, slot)| slot.config.prepare == PrepareMode::Blocking)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in model_ids {
            self.restore_floor(&id);
        }
    }

    /// Spawns a background thread that warms every `prepare: async`
    /// model's floor without blocking the caller.
    pub fn prepare_all_floors_async(self: &Arc<Self>) {
        let model_ids: Vec<String> = {
            let table = self.table.lock();
            table
                .models
                .iter()
                .filter(|(_, slot)| slot.config.prepare == PrepareMode::Async)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if model_ids.is_empty() {
            return;
        }
        let pool = Arc::clone(self);
        std::thread::spawn(move || {
            for id in model_ids {
                pool.restore_floor(&id);
            }
        });
    }

    /// §4.4.5: refuse new acquires, drain queued waiters with
    /// `ShuttingDown`, cancel every Busy instance, await releases, stop
    /// the maintenance thread, then dispose every remaining instance.
    pub fn stop(self: &Arc<Self>) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("pool shutting down, draining waiters and instances");

        let waiters: Vec<Arc<Waiter>> = {
            let mut table = self.table.lock();
            let mut out = Vec::new();
            for slot in table.models.values_mut() {
                while let Some(w) = slot.waiters.pop_front() {
                    out.push(w);
                }
            }
            out
        };
        for w in waiters {
            w.grant_shutdown_error();
        }

        let all_instances: Vec<Arc<Instance>> = {
            let table = self.table.lock();
            table
                .models
                .values()
                .flat_map(|slot| slot.instances.iter().cloned())
                .collect()
        };

        for inst in &all_instances {
            inst.signal_shutdown_cancel();
        }
        for inst in &all_instances {
            inst.await_release();
        }

        self.stop_maintenance();

        for inst in &all_instances {
            inst.dispose();
        }

        let mut table = self.table.lock();
        for slot in table.models.values_mut() {
            slot.instances.clear();
        }
        drop(table);
        log::info!("pool shutdown complete");
    }
}

/// §4.4.1 step 3's matcher: among Idle instances, prefer a true prefix
/// match over the longest common run over the most recently used,
/// reflecting invariant 4 while still making progress when nothing is a
/// true prefix.
fn pick_idle_prefix_match(
    instances: &[Arc<Instance>],
    request_fp: &ContextFingerprint,
) -> Option<Arc<Instance>> {
    instances
        .iter()
        .filter(|i| i.status() == InstanceStatus::Idle)
        .max_by_key(|i| {
            let fp = i.fingerprint();
            let is_prefix = fp.is_prefix_of(request_fp);
            let common = fp.common_prefix_len(request_fp);
            (is_prefix, common, i.last_used_at())
        })
        .cloned()
}
