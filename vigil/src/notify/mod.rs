//! Notification targets.
//!
//! A `NotifyTarget` is one configured instance of a messaging backend. It
//! owns its own attribute maps and holds non-owning references to the rest
//! of its override chain: an optional shared "main" record, the per-type
//! defaults, and the built-in hard defaults. Endpoint construction,
//! validation and dispatch all read attributes through that chain.

pub mod attributes;
pub mod dispatch;
pub mod endpoint;
pub mod types;
pub mod validate;

pub use attributes::{AttributeChain, AttributeSet, Namespace};
pub use dispatch::{HttpSenderFactory, Sender, SenderFactory};
pub use types::{ALL_TYPES, NotifierType};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::status::ServiceStatus;
use crate::template::{self, ServiceInfo};

/// A shared override record: "main" entries, per-type defaults and the
/// built-in hard defaults all have this shape. No fail tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyDefaults {
    /// Backend type, where the record declares one ("main" records may).
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(flatten)]
    pub attrs: AttributeSet,
}

impl NotifyDefaults {
    pub fn new(kind: impl Into<String>, attrs: AttributeSet) -> Self {
        let mut defaults = Self {
            kind: kind.into(),
            attrs,
        };
        defaults.attrs.normalize();
        defaults
    }
}

/// Process-wide table of shared defaults records, looked up by type.
///
/// Hard defaults exist for every recognized type; a type with no hard
/// defaults is an invalid type. Records are immutable after construction
/// and handed to targets by reference.
#[derive(Debug)]
pub struct DefaultsTable {
    defaults: HashMap<String, Arc<NotifyDefaults>>,
    hard_defaults: HashMap<String, Arc<NotifyDefaults>>,
    empty: Arc<NotifyDefaults>,
}

impl DefaultsTable {
    /// Build the table from user-configured per-type defaults (may be
    /// empty). Hard defaults are always populated for every type.
    pub fn new(user_defaults: HashMap<String, NotifyDefaults>) -> Self {
        let hard_defaults = ALL_TYPES
            .iter()
            .map(|kind| {
                (
                    kind.as_str().to_string(),
                    Arc::new(hard_defaults_for(*kind)),
                )
            })
            .collect();

        let defaults = user_defaults
            .into_iter()
            .map(|(kind, mut record)| {
                record.attrs.normalize();
                (kind.to_lowercase(), Arc::new(record))
            })
            .collect();

        Self {
            defaults,
            hard_defaults,
            empty: Arc::new(NotifyDefaults::default()),
        }
    }

    /// The built-in record for `kind`, or `None` for an invalid type.
    pub fn hard_defaults(&self, kind: &str) -> Option<Arc<NotifyDefaults>> {
        self.hard_defaults.get(kind).cloned()
    }

    /// The user-configured record for `kind`, or an empty shared record.
    pub fn defaults(&self, kind: &str) -> Arc<NotifyDefaults> {
        self.defaults.get(kind).cloned().unwrap_or_else(|| self.empty.clone())
    }
}

impl Default for DefaultsTable {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

fn hard_defaults_for(kind: NotifierType) -> NotifyDefaults {
    let mut attrs = AttributeSet::new();
    attrs.set(Namespace::Options, "max_tries", "3");
    attrs.set(Namespace::Options, "delay", "0s");
    attrs.set(
        Namespace::Options,
        "message",
        "{{ id }} - {{ latest_version }} released",
    );
    if kind == NotifierType::Ntfy {
        attrs.set(Namespace::UrlFields, "host", "ntfy.sh");
    }
    NotifyDefaults {
        kind: kind.as_str().to_string(),
        attrs,
    }
}

/// One configured notification backend instance.
pub struct NotifyTarget {
    /// Stable identifier; doubles as the type when nothing else declares
    /// one.
    pub id: String,
    /// Self-declared type, may be empty (inherit from main, or the ID).
    pub(crate) kind: String,
    /// Own attribute maps, lowest level of the override chain.
    pub(crate) attrs: AttributeSet,
    pub(crate) main: Arc<NotifyDefaults>,
    pub(crate) defaults: Arc<NotifyDefaults>,
    pub(crate) hard_defaults: Arc<NotifyDefaults>,
    pub(crate) status: Arc<ServiceStatus>,
    pub(crate) factory: Arc<dyn SenderFactory>,
    pub(crate) shutdown: CancellationToken,
}

impl NotifyTarget {
    /// Create a target with an unlinked status and the default HTTP
    /// sender factory; link real ones with the `with_*` builders.
    pub fn new(id: impl Into<String>, kind: impl Into<String>, mut attrs: AttributeSet) -> Self {
        attrs.normalize();
        Self {
            id: id.into(),
            kind: kind.into(),
            attrs,
            main: Arc::new(NotifyDefaults::default()),
            defaults: Arc::new(NotifyDefaults::default()),
            hard_defaults: Arc::new(NotifyDefaults::default()),
            status: Arc::new(ServiceStatus::new("", "", "")),
            factory: Arc::new(HttpSenderFactory::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_main(mut self, main: Arc<NotifyDefaults>) -> Self {
        self.main = main;
        self
    }

    pub fn with_status(mut self, status: Arc<ServiceStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn SenderFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Attach the process-wide shutdown token; the delay/retry waits of a
    /// dispatch end early when it fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Look up this target's defaults/hard-defaults records by its
    /// resolved type. Unknown types keep empty records; validation
    /// reports them.
    pub fn link_defaults(mut self, table: &DefaultsTable) -> Self {
        let kind = self.resolved_type();
        self.defaults = table.defaults(&kind);
        if let Some(hard) = table.hard_defaults(&kind) {
            self.hard_defaults = hard;
        }
        self
    }

    /// The override chain over this target's attribute sets.
    pub fn chain(&self) -> AttributeChain<'_> {
        AttributeChain::new(
            &self.attrs,
            &self.main.attrs,
            &self.defaults.attrs,
            &self.hard_defaults.attrs,
        )
    }

    /// Effective type: own declaration, then the main record's, then the
    /// target's ID. Lets an instance named `slack` omit its type.
    pub fn resolved_type(&self) -> String {
        if !self.kind.is_empty() {
            self.kind.clone()
        } else if !self.main.kind.is_empty() {
            self.main.kind.clone()
        } else {
            self.id.clone()
        }
    }

    /// Parsed effective type; `None` means invalid.
    pub fn notifier_type(&self) -> Option<NotifierType> {
        NotifierType::parse(&self.resolved_type())
    }

    /// Write an attribute at the instance (self) level.
    pub fn set_attr(&mut self, namespace: Namespace, key: &str, value: impl Into<String>) {
        self.attrs.set(namespace, key, value);
    }

    pub fn get_url_field(&self, key: &str) -> String {
        self.chain().resolve(Namespace::UrlFields, key)
    }

    pub fn get_option(&self, key: &str) -> String {
        self.chain().resolve(Namespace::Options, key)
    }

    pub fn get_param(&self, key: &str) -> String {
        self.chain().resolve(Namespace::Params, key)
    }

    /// Resolved `options.delay`; empty resolves to the `"0s"` sentinel.
    pub fn delay(&self) -> String {
        let delay = self.get_option("delay");
        if delay.is_empty() {
            "0s".to_string()
        } else {
            delay
        }
    }

    /// Parsed delay; unparsable values (caught by validation) read as
    /// zero.
    pub fn delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.delay()).unwrap_or(Duration::ZERO)
    }

    /// Resolved `options.max_tries`; unparsable or absent resolves to 0,
    /// which the dispatcher treats as "no attempt performed".
    pub fn max_tries(&self) -> u32 {
        self.get_option("max_tries").parse().unwrap_or(0)
    }

    /// Resolved, templated `params.title`.
    pub fn title(&self, info: &ServiceInfo) -> Result<String> {
        template::render(&self.get_param("title"), info)
    }

    /// Resolved, templated `options.message`.
    pub fn message(&self, info: &ServiceInfo) -> Result<String> {
        template::render(&self.get_option("message"), info)
    }
}

/// The configured notification targets of one service, in config order.
#[derive(Default)]
pub struct Slice {
    targets: Vec<NotifyTarget>,
}

impl Slice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: NotifyTarget) {
        self.targets.push(target);
    }

    pub fn get(&self, id: &str) -> Option<&NotifyTarget> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut NotifyTarget> {
        self.targets.iter_mut().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotifyTarget> {
        self.targets.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut NotifyTarget> {
        self.targets.iter_mut()
    }
}
