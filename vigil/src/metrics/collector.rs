//! Metrics collector implementation.
//!
//! Collects send outcomes and version-state gauges for every monitored
//! service. The collector is an injected handle (`Arc<MetricsCollector>`),
//! shared by status and dispatch code; there is no process-wide registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

/// Pending-update classification of one service, derived from its
/// (approved, deployed, latest) version tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateClass {
    /// A newer version exists and has not been acted on.
    Available,
    /// The newer version was approved but not yet deployed.
    Approved,
    /// The newer version was skipped.
    Skipped,
}

impl UpdateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Approved => "APPROVED",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// Labels for a notification-target counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKey {
    /// Stable target ID.
    pub id: String,
    /// Owning service ID.
    pub service_id: String,
    /// Resolved backend type.
    pub kind: String,
}

/// Labels for a command/webhook counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    /// Command formatted representation or webhook ID.
    pub id: String,
    /// Owning service ID.
    pub service_id: String,
}

/// Metrics collector for the release tracker.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    // Send outcome counters
    notify_success_total: DashMap<SenderKey, AtomicU64>,
    notify_fail_total: DashMap<SenderKey, AtomicU64>,
    command_success_total: DashMap<ServiceKey, AtomicU64>,
    command_fail_total: DashMap<ServiceKey, AtomicU64>,
    webhook_success_total: DashMap<ServiceKey, AtomicU64>,
    webhook_fail_total: DashMap<ServiceKey, AtomicU64>,

    // Version-state gauges
    update_available: DashMap<String, AtomicU64>,
    updates_current: DashMap<&'static str, AtomicI64>,
}

/// Point-in-time copy of every series, consumed by the exporter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub notify_success: Vec<(String, String, String, u64)>,
    pub notify_fail: Vec<(String, String, String, u64)>,
    pub command_success: Vec<(String, String, u64)>,
    pub command_fail: Vec<(String, String, u64)>,
    pub webhook_success: Vec<(String, String, u64)>,
    pub webhook_fail: Vec<(String, String, u64)>,
    pub update_available: HashMap<String, u64>,
    pub updates_current: HashMap<String, i64>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Send Outcomes ==========

    /// Record the terminal outcome of one notification dispatch.
    pub fn record_notify_result(&self, key: &SenderKey, success: bool) {
        let map = if success {
            &self.notify_success_total
        } else {
            &self.notify_fail_total
        };
        map.entry(key.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one command run.
    pub fn record_command_result(&self, key: &ServiceKey, success: bool) {
        let map = if success {
            &self.command_success_total
        } else {
            &self.command_fail_total
        };
        map.entry(key.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one webhook delivery.
    pub fn record_webhook_result(&self, key: &ServiceKey, success: bool) {
        let map = if success {
            &self.webhook_success_total
        } else {
            &self.webhook_fail_total
        };
        map.entry(key.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every counter for a notification target (target deleted).
    pub fn remove_notify_counters(&self, key: &SenderKey) {
        self.notify_success_total.remove(key);
        self.notify_fail_total.remove(key);
    }

    // ========== Version Gauges ==========

    /// Set whether the latest known version is the deployed one.
    pub fn set_update_available(&self, service_id: &str, available: bool) {
        self.update_available
            .entry(service_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(available as u64, Ordering::Relaxed);
    }

    /// Move a service between pending-update classifications. `None`
    /// means the service had (or now has) no pending update.
    pub fn move_update_class(&self, from: Option<UpdateClass>, to: Option<UpdateClass>) {
        if from == to {
            return;
        }
        if let Some(from) = from {
            self.updates_current
                .entry(from.as_str())
                .or_insert_with(|| AtomicI64::new(0))
                .fetch_sub(1, Ordering::Relaxed);
        }
        if let Some(to) = to {
            self.updates_current
                .entry(to.as_str())
                .or_insert_with(|| AtomicI64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current aggregate count for a classification.
    pub fn updates_current(&self, class: UpdateClass) -> i64 {
        self.updates_current
            .get(class.as_str())
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Number of terminal outcomes recorded for a target.
    pub fn notify_count(&self, key: &SenderKey, success: bool) -> u64 {
        let map = if success {
            &self.notify_success_total
        } else {
            &self.notify_fail_total
        };
        map.get(key).map(|v| v.load(Ordering::Relaxed)).unwrap_or(0)
    }

    /// Drop every series belonging to `service_id` (service unloaded).
    pub fn remove_service(&self, service_id: &str) {
        self.update_available.remove(service_id);
        self.notify_success_total.retain(|k, _| k.service_id != service_id);
        self.notify_fail_total.retain(|k, _| k.service_id != service_id);
        self.command_success_total.retain(|k, _| k.service_id != service_id);
        self.command_fail_total.retain(|k, _| k.service_id != service_id);
        self.webhook_success_total.retain(|k, _| k.service_id != service_id);
        self.webhook_fail_total.retain(|k, _| k.service_id != service_id);
    }

    /// Take a point-in-time snapshot of every series.
    pub fn snapshot(&self) -> MetricsSnapshot {
        fn sender_series(map: &DashMap<SenderKey, AtomicU64>) -> Vec<(String, String, String, u64)> {
            let mut out: Vec<_> = map
                .iter()
                .map(|e| {
                    let k = e.key();
                    (
                        k.id.clone(),
                        k.service_id.clone(),
                        k.kind.clone(),
                        e.value().load(Ordering::Relaxed),
                    )
                })
                .collect();
            out.sort();
            out
        }

        fn service_series(map: &DashMap<ServiceKey, AtomicU64>) -> Vec<(String, String, u64)> {
            let mut out: Vec<_> = map
                .iter()
                .map(|e| {
                    let k = e.key();
                    (
                        k.id.clone(),
                        k.service_id.clone(),
                        e.value().load(Ordering::Relaxed),
                    )
                })
                .collect();
            out.sort();
            out
        }

        MetricsSnapshot {
            notify_success: sender_series(&self.notify_success_total),
            notify_fail: sender_series(&self.notify_fail_total),
            command_success: service_series(&self.command_success_total),
            command_fail: service_series(&self.command_fail_total),
            webhook_success: service_series(&self.webhook_success_total),
            webhook_fail: service_series(&self.webhook_fail_total),
            update_available: self
                .update_available
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
            updates_current: self
                .updates_current
                .iter()
                .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}
