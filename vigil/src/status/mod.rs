//! Service status module.
//!
//! `ServiceStatus` is the version state machine for one monitored service:
//! the (approved, deployed, latest) tuple, their timestamps, query
//! bookkeeping, the send-outcome ledgers, and the side-effect fan-out that
//! every version transition drives (metrics, announce broadcast,
//! persistence message).

pub mod fails;
pub mod messages;

pub use fails::{CommandFails, SendState, StatusFails, TargetFails};
pub use messages::{
    AnnounceMessage, AnnounceSubtype, AnnounceType, Cell, CommandSummary, PersistMessage,
    ServiceData, Sink, StatusSummary, columns,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;

use crate::metrics::{MetricsCollector, UpdateClass};
use crate::template::ServiceInfo;

/// Prefix marking an approved-version value as "skip this release".
pub const SKIP_PREFIX: &str = "SKIP_";

#[derive(Debug, Clone, Default)]
struct VersionFields {
    approved_version: String,
    deployed_version: String,
    deployed_version_timestamp: String,
    latest_version: String,
    latest_version_timestamp: String,
    last_queried: String,
}

impl VersionFields {
    /// Pending-update classification derived from the version tuple.
    fn classify(&self) -> Option<UpdateClass> {
        if self.latest_version.is_empty() || self.latest_version == self.deployed_version {
            return None;
        }
        if self.approved_version == format!("{}{}", SKIP_PREFIX, self.latest_version) {
            Some(UpdateClass::Skipped)
        } else if self.approved_version == self.latest_version {
            Some(UpdateClass::Approved)
        } else {
            Some(UpdateClass::Available)
        }
    }
}

/// Release-lifecycle state for one monitored service.
///
/// Version setters are idempotent: setting the current value is a complete
/// no-op (no side effects). Once `set_deleting` has been called, version
/// mutation and every side-effect emission stop, so in-flight work cannot
/// announce or persist on behalf of a service being torn down.
pub struct ServiceStatus {
    service_id: String,
    service_url: String,
    web_url: String,

    versions: RwLock<VersionFields>,
    deleting: AtomicBool,
    regex_misses_content: AtomicU64,
    regex_misses_version: AtomicU64,

    /// Send-outcome ledgers for this service's senders.
    pub fails: StatusFails,

    announce: Sink<AnnounceMessage>,
    persist: Sink<PersistMessage>,
    save: Sink<()>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ServiceStatus {
    /// Create a status with no consumers attached; sinks drop everything
    /// until replaced via the `with_*` builders.
    pub fn new(
        service_id: impl Into<String>,
        service_url: impl Into<String>,
        web_url: impl Into<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            service_url: service_url.into(),
            web_url: web_url.into(),
            versions: RwLock::new(VersionFields::default()),
            deleting: AtomicBool::new(false),
            regex_misses_content: AtomicU64::new(0),
            regex_misses_version: AtomicU64::new(0),
            fails: StatusFails::new(),
            announce: Sink::absent(),
            persist: Sink::absent(),
            save: Sink::absent(),
            metrics: None,
        }
    }

    pub fn with_announce(mut self, sink: Sink<AnnounceMessage>) -> Self {
        self.announce = sink;
        self
    }

    pub fn with_persist(mut self, sink: Sink<PersistMessage>) -> Self {
        self.persist = sink;
        self
    }

    pub fn with_save(mut self, sink: Sink<()>) -> Self {
        self.save = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Size the ledgers for this service's sender counts.
    pub fn init(&self, commands: usize, notify_targets: usize, webhooks: usize) {
        self.fails.command.init(commands);
        self.fails.notify.init(notify_targets);
        self.fails.webhook.init(webhooks);
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Templating context snapshot for this service.
    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            id: self.service_id.clone(),
            url: self.service_url.clone(),
            web_url: self.web_url.clone(),
            latest_version: self.latest_version(),
        }
    }

    // ========== Version fields ==========

    pub fn approved_version(&self) -> String {
        self.versions.read().approved_version.clone()
    }

    pub fn deployed_version(&self) -> String {
        self.versions.read().deployed_version.clone()
    }

    pub fn deployed_version_timestamp(&self) -> String {
        self.versions.read().deployed_version_timestamp.clone()
    }

    pub fn latest_version(&self) -> String {
        self.versions.read().latest_version.clone()
    }

    pub fn latest_version_timestamp(&self) -> String {
        self.versions.read().latest_version_timestamp.clone()
    }

    pub fn last_queried(&self) -> String {
        self.versions.read().last_queried.clone()
    }

    /// Record a query time. Empty defaults to now (UTC, RFC3339).
    pub fn set_last_queried(&self, timestamp: &str) {
        let timestamp = if timestamp.is_empty() {
            now_utc()
        } else {
            timestamp.to_string()
        };
        self.versions.write().last_queried = timestamp;
    }

    /// Structural equality of the version 3-tuple only. Timestamps and
    /// ledgers are ignored.
    pub fn same_versions(&self, other: &ServiceStatus) -> bool {
        let ours = self.versions.read();
        let theirs = other.versions.read();
        ours.approved_version == theirs.approved_version
            && ours.deployed_version == theirs.deployed_version
            && ours.latest_version == theirs.latest_version
    }

    /// Set the approved version (a pending release was approved or
    /// skipped, via the `SKIP_` marker).
    pub fn set_approved_version(&self, version: &str, write_side_effects: bool) {
        if self.is_deleting() {
            return;
        }

        let (old_class, new_class, snapshot);
        {
            let mut fields = self.versions.write();
            if fields.approved_version == version {
                return;
            }
            old_class = fields.classify();
            fields.approved_version = version.to_string();
            new_class = fields.classify();
            snapshot = fields.clone();
        }

        if !write_side_effects {
            return;
        }

        self.write_version_metrics(&snapshot, old_class, new_class);
        self.send_announce(
            AnnounceType::Version,
            AnnounceSubtype::Action,
            StatusSummary {
                approved_version: Some(snapshot.approved_version.clone()),
                ..Default::default()
            },
        );
        self.send_persist(vec![Cell::new(
            columns::APPROVED_VERSION,
            snapshot.approved_version,
        )]);
    }

    /// Set the deployed version. An empty `release_date` defaults to now.
    ///
    /// Deploying the currently-approved version consumes the approval;
    /// a changed deployment invalidates all prior send outcomes.
    pub fn set_deployed_version(&self, version: &str, release_date: &str, write_side_effects: bool) {
        if self.is_deleting() {
            return;
        }

        let (old_class, new_class, snapshot);
        {
            let mut fields = self.versions.write();
            if fields.deployed_version == version {
                return;
            }
            old_class = fields.classify();
            fields.deployed_version = version.to_string();
            fields.deployed_version_timestamp = if release_date.is_empty() {
                now_utc()
            } else {
                release_date.to_string()
            };
            if fields.approved_version == version {
                fields.approved_version.clear();
            }
            new_class = fields.classify();
            snapshot = fields.clone();
        }

        if !write_side_effects {
            return;
        }

        self.write_version_metrics(&snapshot, old_class, new_class);
        self.fails.reset_all();
        self.send_announce(
            AnnounceType::Version,
            AnnounceSubtype::Updated,
            StatusSummary {
                deployed_version: Some(snapshot.deployed_version.clone()),
                deployed_version_timestamp: Some(snapshot.deployed_version_timestamp.clone()),
                ..Default::default()
            },
        );
        self.send_persist(vec![
            Cell::new(columns::DEPLOYED_VERSION, snapshot.deployed_version),
            Cell::new(
                columns::DEPLOYED_VERSION_TIMESTAMP,
                snapshot.deployed_version_timestamp,
            ),
        ]);
    }

    /// Set the latest known version. An empty `release_date` defaults to
    /// the last query time.
    pub fn set_latest_version(&self, version: &str, release_date: &str, write_side_effects: bool) {
        if self.is_deleting() {
            return;
        }

        let (old_class, new_class, snapshot);
        {
            let mut fields = self.versions.write();
            if fields.latest_version == version {
                return;
            }
            old_class = fields.classify();
            fields.latest_version = version.to_string();
            fields.latest_version_timestamp = if release_date.is_empty() {
                fields.last_queried.clone()
            } else {
                release_date.to_string()
            };
            new_class = fields.classify();
            snapshot = fields.clone();
        }

        if !write_side_effects {
            return;
        }

        self.write_version_metrics(&snapshot, old_class, new_class);
        self.fails.reset_all();
        self.send_announce(
            AnnounceType::Version,
            AnnounceSubtype::New,
            StatusSummary {
                latest_version: Some(snapshot.latest_version.clone()),
                latest_version_timestamp: Some(snapshot.latest_version_timestamp.clone()),
                ..Default::default()
            },
        );
        self.send_persist(vec![
            Cell::new(columns::LATEST_VERSION, snapshot.latest_version),
            Cell::new(
                columns::LATEST_VERSION_TIMESTAMP,
                snapshot.latest_version_timestamp,
            ),
        ]);
    }

    // ========== Announce helpers ==========

    /// Broadcast the first known version of a freshly-loaded service.
    pub fn announce_first_version(&self) {
        let fields = self.versions.read().clone();
        self.send_announce(
            AnnounceType::Version,
            AnnounceSubtype::Init,
            StatusSummary {
                latest_version: Some(fields.latest_version),
                latest_version_timestamp: Some(fields.latest_version_timestamp),
                ..Default::default()
            },
        );
    }

    /// Broadcast that a version query completed without a change.
    pub fn announce_query(&self) {
        let fields = self.versions.read().clone();
        self.send_announce(
            AnnounceType::Version,
            AnnounceSubtype::Query,
            StatusSummary {
                last_queried: Some(fields.last_queried),
                ..Default::default()
            },
        );
    }

    /// Broadcast a command/webhook event carrying a `command_data`
    /// snapshot. Suppressed while deleting.
    pub fn announce_event(
        &self,
        kind: AnnounceType,
        command_data: std::collections::HashMap<String, CommandSummary>,
    ) {
        if self.is_deleting() {
            return;
        }
        let message = AnnounceMessage::new(
            kind,
            AnnounceSubtype::Event,
            ServiceData {
                id: self.service_id.clone(),
                web_url: self.optional_web_url(),
                status: None,
                command_data: Some(command_data),
            },
        );
        self.announce.try_send(message);
    }

    /// Ask the (external) config layer to re-save. Non-blocking.
    pub fn request_save(&self) {
        if self.is_deleting() {
            return;
        }
        self.save.try_send(());
    }

    // ========== Query bookkeeping ==========

    pub fn regex_miss_content(&self) -> u64 {
        self.regex_misses_content.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn regex_miss_version(&self) -> u64 {
        self.regex_misses_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn regex_misses(&self) -> (u64, u64) {
        (
            self.regex_misses_content.load(Ordering::Relaxed),
            self.regex_misses_version.load(Ordering::Relaxed),
        )
    }

    pub fn reset_regex_misses(&self) {
        self.regex_misses_content.store(0, Ordering::Relaxed);
        self.regex_misses_version.store(0, Ordering::Relaxed);
    }

    // ========== Teardown ==========

    /// One-way flag: stop emitting side effects and mutating versions.
    pub fn set_deleting(&self) {
        self.deleting.store(true, Ordering::SeqCst);
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting.load(Ordering::SeqCst)
    }

    /// Remove every metric series for this service. Call after
    /// `set_deleting`, before dropping the status.
    pub fn remove_metrics(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let class = self.versions.read().classify();
        metrics.move_update_class(class, None);
        metrics.remove_service(&self.service_id);
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    // ========== Internals ==========

    fn optional_web_url(&self) -> Option<String> {
        if self.web_url.is_empty() {
            None
        } else {
            Some(self.web_url.clone())
        }
    }

    fn write_version_metrics(
        &self,
        snapshot: &VersionFields,
        old_class: Option<UpdateClass>,
        new_class: Option<UpdateClass>,
    ) {
        if let Some(metrics) = &self.metrics {
            metrics.set_update_available(
                &self.service_id,
                snapshot.latest_version != snapshot.deployed_version,
            );
            metrics.move_update_class(old_class, new_class);
        }
    }

    fn send_announce(&self, kind: AnnounceType, subtype: AnnounceSubtype, status: StatusSummary) {
        if self.is_deleting() {
            return;
        }
        let message = AnnounceMessage::new(
            kind,
            subtype,
            ServiceData {
                id: self.service_id.clone(),
                web_url: self.optional_web_url(),
                status: Some(status),
                command_data: None,
            },
        );
        self.announce.try_send(message);
    }

    fn send_persist(&self, cells: Vec<Cell>) {
        if self.is_deleting() {
            return;
        }
        self.persist.try_send(PersistMessage {
            service_id: self.service_id.clone(),
            cells,
        });
    }
}

fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn status_with_channels() -> (
        ServiceStatus,
        mpsc::Receiver<AnnounceMessage>,
        mpsc::Receiver<PersistMessage>,
    ) {
        let (announce_tx, announce_rx) = mpsc::channel(16);
        let (persist_tx, persist_rx) = mpsc::channel(16);
        let status = ServiceStatus::new("gitea", "https://github.com/go-gitea/gitea", "")
            .with_announce(Sink::new(announce_tx))
            .with_persist(Sink::new(persist_tx));
        (status, announce_rx, persist_rx)
    }

    fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_deploy_consumes_approval() {
        let (status, _announce, _persist) = status_with_channels();
        status.set_approved_version("1.2.3", false);
        status.set_deployed_version("1.2.3", "", true);

        assert_eq!(status.approved_version(), "");
        assert_eq!(status.deployed_version(), "1.2.3");
    }

    #[test]
    fn test_repeat_deploy_is_complete_noop() {
        let (status, mut announce, mut persist) = status_with_channels();
        status.set_deployed_version("1.2.3", "", true);
        assert_eq!(drain(&mut announce).len(), 1);
        assert_eq!(drain(&mut persist).len(), 1);

        status.set_deployed_version("1.2.3", "", true);
        assert_eq!(drain(&mut announce).len(), 0);
        assert_eq!(drain(&mut persist).len(), 0);
    }

    #[test]
    fn test_deploy_emits_two_column_persist() {
        let (status, _announce, mut persist) = status_with_channels();
        status.set_deployed_version("2.0.0", "2025-06-01T00:00:00Z", true);

        let messages = drain(&mut persist);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].service_id, "gitea");
        assert_eq!(
            messages[0].cells,
            vec![
                Cell::new(columns::DEPLOYED_VERSION, "2.0.0"),
                Cell::new(columns::DEPLOYED_VERSION_TIMESTAMP, "2025-06-01T00:00:00Z"),
            ]
        );
    }

    #[test]
    fn test_approve_emits_action_announce_and_single_column() {
        let (status, mut announce, mut persist) = status_with_channels();
        status.set_latest_version("2.0.0", "2025-06-01T00:00:00Z", false);
        status.set_approved_version("2.0.0", true);

        let announces = drain(&mut announce);
        assert_eq!(announces.len(), 1);
        assert_eq!(announces[0].kind, AnnounceType::Version);
        assert_eq!(announces[0].subtype, AnnounceSubtype::Action);
        assert_eq!(
            announces[0]
                .service_data
                .status
                .as_ref()
                .unwrap()
                .approved_version
                .as_deref(),
            Some("2.0.0")
        );

        let persists = drain(&mut persist);
        assert_eq!(persists.len(), 1);
        assert_eq!(
            persists[0].cells,
            vec![Cell::new(columns::APPROVED_VERSION, "2.0.0")]
        );
    }

    #[test]
    fn test_latest_timestamp_defaults_to_last_queried() {
        let (status, _announce, _persist) = status_with_channels();
        status.set_last_queried("2025-03-01T12:00:00Z");
        status.set_latest_version("3.0.0", "", true);
        assert_eq!(status.latest_version_timestamp(), "2025-03-01T12:00:00Z");
    }

    #[test]
    fn test_new_version_resets_ledgers() {
        let (status, _announce, _persist) = status_with_channels();
        status.init(1, 0, 0);
        status.fails.command.set(0, SendState::Fail);
        status.fails.notify.set("slack", SendState::Pass);

        status.set_latest_version("3.0.0", "", true);

        assert_eq!(status.fails.command.get(0), SendState::Unset);
        assert_eq!(status.fails.notify.get("slack"), SendState::Unset);
        assert_eq!(status.fails.notify.length(), 1);
    }

    #[test]
    fn test_no_side_effects_when_not_requested() {
        let (status, mut announce, mut persist) = status_with_channels();
        status.init(0, 0, 0);
        status.fails.notify.set("slack", SendState::Fail);

        status.set_latest_version("3.0.0", "", false);

        assert_eq!(drain(&mut announce).len(), 0);
        assert_eq!(drain(&mut persist).len(), 0);
        assert_eq!(status.fails.notify.get("slack"), SendState::Fail);
    }

    #[test]
    fn test_deleting_suppresses_mutation_and_emission() {
        let (status, mut announce, mut persist) = status_with_channels();
        status.set_deleting();
        status.set_latest_version("9.9.9", "", true);
        status.set_deployed_version("9.9.9", "", true);
        status.set_approved_version("9.9.9", true);

        assert_eq!(status.latest_version(), "");
        assert_eq!(status.deployed_version(), "");
        assert_eq!(status.approved_version(), "");
        assert_eq!(drain(&mut announce).len(), 0);
        assert_eq!(drain(&mut persist).len(), 0);
    }

    #[test]
    fn test_same_versions_ignores_timestamps() {
        let (a, _, _) = status_with_channels();
        let (b, _, _) = status_with_channels();
        a.set_latest_version("1.0.0", "2025-01-01T00:00:00Z", false);
        b.set_latest_version("1.0.0", "2026-01-01T00:00:00Z", false);
        assert!(a.same_versions(&b));

        b.set_deployed_version("1.0.0", "", false);
        assert!(!a.same_versions(&b));
    }

    #[test]
    fn test_update_classification_moves() {
        let metrics = Arc::new(MetricsCollector::new());
        let status = ServiceStatus::new("gitea", "", "").with_metrics(metrics.clone());

        status.set_latest_version("2.0.0", "", true);
        assert_eq!(metrics.updates_current(UpdateClass::Available), 1);

        status.set_approved_version("2.0.0", true);
        assert_eq!(metrics.updates_current(UpdateClass::Available), 0);
        assert_eq!(metrics.updates_current(UpdateClass::Approved), 1);

        status.set_approved_version("SKIP_2.0.0", true);
        assert_eq!(metrics.updates_current(UpdateClass::Approved), 0);
        assert_eq!(metrics.updates_current(UpdateClass::Skipped), 1);

        status.set_deployed_version("2.0.0", "", true);
        assert_eq!(metrics.updates_current(UpdateClass::Skipped), 0);
    }

    #[test]
    fn test_remove_metrics_clears_pending_classification() {
        let metrics = Arc::new(MetricsCollector::new());
        let status = ServiceStatus::new("gitea", "", "").with_metrics(metrics.clone());
        status.set_latest_version("2.0.0", "", true);
        assert_eq!(metrics.updates_current(UpdateClass::Available), 1);

        status.set_deleting();
        status.remove_metrics();
        assert_eq!(metrics.updates_current(UpdateClass::Available), 0);
    }

    #[test]
    fn test_announce_first_version_and_query() {
        let (status, mut announce, _persist) = status_with_channels();
        status.set_last_queried("2025-03-01T12:00:00Z");
        status.set_latest_version("1.0.0", "", false);

        status.announce_first_version();
        status.announce_query();

        let messages = drain(&mut announce);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].subtype, AnnounceSubtype::Init);
        assert_eq!(
            messages[0]
                .service_data
                .status
                .as_ref()
                .unwrap()
                .latest_version
                .as_deref(),
            Some("1.0.0")
        );
        assert_eq!(messages[1].subtype, AnnounceSubtype::Query);
        assert_eq!(
            messages[1]
                .service_data
                .status
                .as_ref()
                .unwrap()
                .last_queried
                .as_deref(),
            Some("2025-03-01T12:00:00Z")
        );
    }

    #[test]
    fn test_regex_miss_counters() {
        let (status, _, _) = status_with_channels();
        assert_eq!(status.regex_miss_content(), 1);
        assert_eq!(status.regex_miss_content(), 2);
        assert_eq!(status.regex_miss_version(), 1);
        assert_eq!(status.regex_misses(), (2, 1));
        status.reset_regex_misses();
        assert_eq!(status.regex_misses(), (0, 0));
    }
}
