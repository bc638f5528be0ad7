//! Background TTL sweep: a dedicated OS thread, grounded directly on
//! `pool::maintenance::start_maintenance_thread`, that periodically evicts
//! above-floor Idle instances whose context has gone stale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::Pool;
use crate::instance::{Instance, InstanceStatus};

pub(crate) struct MaintenanceHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub(crate) fn stop(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Pool {
    /// Starts the sweep thread. Idempotent in practice since `Server`
    /// calls it exactly once per `Pool`, but calling it twice simply
    /// replaces (and orphans) the prior handle rather than panicking.
    pub fn start_maintenance(self: &Arc<Self>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let pool = Arc::clone(self);
        let interval = self.config.maintenance_interval;
        let thread_shutdown = shutdown.clone();
        let join = std::thread::spawn(move || {
            while !thread_shutdown.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                if thread_shutdown.load(Ordering::Acquire) {
                    break;
                }
                pool.sweep_ttl();
            }
        });
        *self.maintenance.lock() = Some(MaintenanceHandle {
            shutdown,
            join: Some(join),
        });
    }

    pub(crate) fn stop_maintenance(&self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.stop();
        }
    }

    /// One sweep across every configured model.
    pub(crate) fn sweep_ttl(self: &Arc<Self>) {
        let model_ids: Vec<String> = {
            let table = self.table.lock();
            table.models.keys().cloned().collect()
        };
        for model_id in model_ids {
            self.sweep_model(&model_id);
        }
    }

    /// Evicts at most one above-floor, TTL-expired Idle instance per
    /// model per sweep (oldest `lastUsedAt` first), then restores the
    /// floor if the eviction dropped the count below `minInstances`.
    fn sweep_model(self: &Arc<Self>, model_id: &str) {
        let now = self.clock.now();
        let candidate = {
            let table = self.table.lock();
            let slot = match table.models.get(model_id) {
                Some(s) => s,
                None => return,
            };
            let min = slot.config.min_instances;
            let ttl = Duration::from_secs(slot.config.ttl_secs);
            let alive = slot
                .instances
                .iter()
                .filter(|i| i.status().counts_toward_floor())
                .count();
            if alive <= min {
                None
            } else {
                slot.instances
                    .iter()
                    .filter(|i| i.status() == InstanceStatus::Idle)
                    .filter(|i| now.saturating_duration_since(i.last_used_at()) > ttl)
                    .min_by_key(|i| i.last_used_at())
                    .cloned()
            }
        };

        if let Some(inst) = candidate {
            self.evict(model_id, inst);
        }
    }

    /// Re-checks status under the lock before disposing: the instance may
    /// have been handed to a concurrent acquirer between the scan above
    /// and this call.
    pub(crate) fn evict(self: &Arc<Self>, model_id: &str, inst: Arc<Instance>) {
        let should_evict = {
            let mut table = self.table.lock();
            match table.models.get_mut(model_id) {
                Some(slot) if inst.status() == InstanceStatus::Idle => {
                    slot.instances.retain(|i| !Arc::ptr_eq(i, &inst));
                    true
                }
                _ => false,
            }
        };
        if should_evict {
            inst.mark_disposing();
            inst.dispose();
            self.restore_floor(model_id);
        }
    }
}
