//! Integration tests for the release tracker core.
//!
//! These wire the real pieces together — defaults table, notification
//! targets, service status with live announce/persist channels, command
//! bookkeeping — and drive a release through approval, deployment and
//! notification fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use vigil::Result;
use vigil::command::{Command, CommandController};
use vigil::metrics::{MetricsCollector, SenderKey, UpdateClass};
use vigil::notify::{
    AttributeSet, DefaultsTable, Namespace, NotifyTarget, Sender, SenderFactory, Slice,
};
use vigil::status::{
    AnnounceMessage, AnnounceSubtype, PersistMessage, SendState, ServiceStatus, Sink, columns,
};

/// Sender double that records endpoints and fails on demand.
struct RecordingSender {
    attempts: Arc<AtomicU32>,
    fail: bool,
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(
        &self,
        _title: &str,
        _message: &str,
        _params: &HashMap<String, String>,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(vigil::Error::send("remote unavailable"))
        } else {
            Ok(())
        }
    }
}

struct RecordingFactory {
    attempts: Arc<AtomicU32>,
    fail: bool,
    endpoints: parking_lot::Mutex<Vec<String>>,
}

impl RecordingFactory {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            attempts: Arc::new(AtomicU32::new(0)),
            fail,
            endpoints: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

impl SenderFactory for RecordingFactory {
    fn locate(&self, _endpoint: &str) -> Result<()> {
        Ok(())
    }

    fn create(&self, endpoint: &str) -> Result<Arc<dyn Sender>> {
        self.endpoints.lock().push(endpoint.to_string());
        Ok(Arc::new(RecordingSender {
            attempts: self.attempts.clone(),
            fail: self.fail,
        }))
    }
}

fn gotify_attrs(port: Option<&str>, path: Option<&str>) -> AttributeSet {
    let mut attrs = AttributeSet::new();
    attrs.set(Namespace::UrlFields, "host", "example.io");
    attrs.set(Namespace::UrlFields, "token", "abc");
    if let Some(port) = port {
        attrs.set(Namespace::UrlFields, "port", port);
    }
    if let Some(path) = path {
        attrs.set(Namespace::UrlFields, "path", path);
    }
    attrs
}

#[tokio::test]
async fn gotify_endpoint_construction_end_to_end() {
    let table = DefaultsTable::default();

    let mut bare = NotifyTarget::new("gotify", "", gotify_attrs(None, None)).link_defaults(&table);
    bare.check_values("").unwrap();
    assert_eq!(bare.build_url(), "gotify://example.io/abc");

    let mut full =
        NotifyTarget::new("gotify", "", gotify_attrs(Some("443"), Some("/x"))).link_defaults(&table);
    full.check_values("").unwrap();
    assert_eq!(full.build_url(), "gotify://example.io:443/x/abc");
}

#[tokio::test(start_paused = true)]
async fn release_flow_announces_persists_and_fans_out() {
    let (announce_tx, mut announce_rx) = mpsc::channel::<AnnounceMessage>(32);
    let (persist_tx, mut persist_rx) = mpsc::channel::<PersistMessage>(32);
    let metrics = Arc::new(MetricsCollector::new());

    let status = Arc::new(
        ServiceStatus::new("gitea", "https://github.com/go-gitea/gitea", "")
            .with_announce(Sink::new(announce_tx))
            .with_persist(Sink::new(persist_tx))
            .with_metrics(metrics.clone()),
    );
    status.init(0, 2, 0);

    // A new latest version arrives.
    status.set_last_queried("2025-06-01T00:00:00Z");
    status.set_latest_version("1.2.3", "", true);
    assert_eq!(metrics.updates_current(UpdateClass::Available), 1);

    let announce = announce_rx.try_recv().unwrap();
    assert_eq!(announce.subtype, AnnounceSubtype::New);
    let persist = persist_rx.try_recv().unwrap();
    assert_eq!(persist.cells[0].column, columns::LATEST_VERSION);
    assert_eq!(persist.cells[0].value, "1.2.3");

    // Fan out the release notification: one healthy target, one broken.
    let table = DefaultsTable::default();
    let ok_factory = RecordingFactory::new(false);
    let bad_factory = RecordingFactory::new(true);

    let mut slice = Slice::new();
    let mut gotify = NotifyTarget::new("gotify", "", gotify_attrs(None, None))
        .link_defaults(&table)
        .with_status(status.clone())
        .with_factory(ok_factory.clone());
    gotify.set_attr(Namespace::Options, "max_tries", "1");
    slice.push(gotify);

    let mut slack_attrs = AttributeSet::new();
    slack_attrs.set(Namespace::UrlFields, "token", "tok");
    slack_attrs.set(Namespace::UrlFields, "channel", "releases");
    slack_attrs.set(Namespace::Options, "max_tries", "2");
    let slack = NotifyTarget::new("slack", "", slack_attrs)
        .link_defaults(&table)
        .with_status(status.clone())
        .with_factory(bad_factory.clone());
    slice.push(slack);

    let err = slice
        .send_all(Some("{{ id }} update"), None, false)
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("slack: remote unavailable x 2"));
    assert!(!text.contains("gotify:"));

    assert_eq!(
        ok_factory.endpoints.lock().as_slice(),
        ["gotify://example.io/abc"]
    );
    assert_eq!(status.fails.notify.get("gotify"), SendState::Pass);
    assert_eq!(status.fails.notify.get("slack"), SendState::Fail);
    assert!(!status.fails.notify.all_passed());

    let gotify_key = SenderKey {
        id: "gotify".to_string(),
        service_id: "gitea".to_string(),
        kind: "gotify".to_string(),
    };
    assert_eq!(metrics.notify_count(&gotify_key, true), 1);

    // Approve, then deploy. Deployment consumes the approval and resets
    // the ledgers.
    status.set_approved_version("1.2.3", true);
    assert_eq!(metrics.updates_current(UpdateClass::Approved), 1);

    status.set_deployed_version("1.2.3", "", true);
    assert_eq!(status.approved_version(), "");
    assert_eq!(status.fails.notify.get("gotify"), SendState::Unset);
    assert_eq!(status.fails.notify.get("slack"), SendState::Unset);
    assert_eq!(metrics.updates_current(UpdateClass::Available), 0);
    assert_eq!(metrics.updates_current(UpdateClass::Approved), 0);

    let subtypes: Vec<AnnounceSubtype> = std::iter::from_fn(|| announce_rx.try_recv().ok())
        .map(|m| m.subtype)
        .collect();
    assert_eq!(
        subtypes,
        vec![
            AnnounceSubtype::Action,
            AnnounceSubtype::Updated,
        ]
    );
}

#[tokio::test]
async fn command_bookkeeping_survives_reload() {
    let status = Arc::new(ServiceStatus::new("gitea", "", ""));
    let old = CommandController::new(
        vec![Command::new(["ls", "-lah"]), Command::new(["true"])],
        status.clone(),
    );
    old.record_result(0, false);
    old.record_result(1, true);

    // Reload with the list reordered and extended.
    let new_status = Arc::new(ServiceStatus::new("gitea", "", ""));
    let new = CommandController::new(
        vec![
            Command::new(["false"]),
            Command::new(["true"]),
            Command::new(["ls", "-lah"]),
        ],
        new_status.clone(),
    );
    new.copy_fails_from(&old);

    assert_eq!(new_status.fails.command.get(0), SendState::Unset);
    assert_eq!(new_status.fails.command.get(1), SendState::Pass);
    assert_eq!(new_status.fails.command.get(2), SendState::Fail);
}

#[tokio::test]
async fn deleting_service_cancels_inflight_dispatch() {
    let status = Arc::new(ServiceStatus::new("gitea", "", ""));
    let factory = RecordingFactory::new(true);

    let mut attrs = AttributeSet::new();
    attrs.set(Namespace::UrlFields, "token", "tok");
    attrs.set(Namespace::UrlFields, "channel", "releases");
    attrs.set(Namespace::Options, "max_tries", "3");
    let target = NotifyTarget::new("slack", "slack", attrs)
        .with_status(status.clone())
        .with_factory(factory.clone());

    status.set_deleting();
    target.send(None, None, false, true).await.unwrap();

    assert_eq!(factory.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(status.fails.notify.get("slack"), SendState::Unset);
}
