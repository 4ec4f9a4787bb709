//! Notifier attribute storage and override-chain resolution.
//!
//! Every notifier attribute lives in one of three namespaces (URL fields,
//! options, query params) and is resolved through the ordered override
//! chain: the target's own attributes, its optional shared "main" record,
//! the per-type defaults, and the built-in hard defaults. Keys are
//! case-insensitive and normalized to lowercase on every ingestion path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Attribute namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    UrlFields,
    Options,
    Params,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrlFields => "url_fields",
            Self::Options => "options",
            Self::Params => "params",
        }
    }
}

/// One level of the override chain: three string maps with
/// lowercase-normalized keys. Absent entries simply don't exist; they are
/// never stored as empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub url_fields: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, namespace: Namespace) -> &HashMap<String, String> {
        match namespace {
            Namespace::UrlFields => &self.url_fields,
            Namespace::Options => &self.options,
            Namespace::Params => &self.params,
        }
    }

    fn map_mut(&mut self, namespace: Namespace) -> &mut HashMap<String, String> {
        match namespace {
            Namespace::UrlFields => &mut self.url_fields,
            Namespace::Options => &mut self.options,
            Namespace::Params => &mut self.params,
        }
    }

    /// Look up `key` (case-insensitively) in `namespace`.
    pub fn get(&self, namespace: Namespace, key: &str) -> Option<&str> {
        self.map(namespace)
            .get(&key.to_lowercase())
            .map(String::as_str)
    }

    /// Write `key` (lowercased) in `namespace`.
    pub fn set(&mut self, namespace: Namespace, key: &str, value: impl Into<String>) {
        self.map_mut(namespace)
            .insert(key.to_lowercase(), value.into());
    }

    /// Remove `key` from `namespace`.
    pub fn unset(&mut self, namespace: Namespace, key: &str) {
        self.map_mut(namespace).remove(&key.to_lowercase());
    }

    /// Lowercase every key in every namespace. Idempotent; values are
    /// never altered. Runs on every ingestion path (construction, edit).
    pub fn normalize(&mut self) {
        for namespace in [Namespace::UrlFields, Namespace::Options, Namespace::Params] {
            let map = self.map_mut(namespace);
            let needs_work = map.keys().any(|k| k.chars().any(|c| c.is_uppercase()));
            if !needs_work {
                continue;
            }
            let lowered: HashMap<String, String> = map
                .drain()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect();
            *map = lowered;
        }
    }
}

/// The ordered 4-level lookup path for a configuration attribute.
///
/// Borrows its levels; defaults/hard-defaults records are process-wide
/// shared singletons owned by the defaults table.
#[derive(Debug, Clone, Copy)]
pub struct AttributeChain<'a> {
    own: &'a AttributeSet,
    main: &'a AttributeSet,
    defaults: &'a AttributeSet,
    hard_defaults: &'a AttributeSet,
}

impl<'a> AttributeChain<'a> {
    pub fn new(
        own: &'a AttributeSet,
        main: &'a AttributeSet,
        defaults: &'a AttributeSet,
        hard_defaults: &'a AttributeSet,
    ) -> Self {
        Self {
            own,
            main,
            defaults,
            hard_defaults,
        }
    }

    /// All four levels, lowest (most specific) first.
    pub fn levels(&self) -> [&'a AttributeSet; 4] {
        [self.own, self.main, self.defaults, self.hard_defaults]
    }

    /// First non-empty value probing self, main, defaults, hard defaults.
    /// All-empty resolves to `""`; absence is not exceptional.
    pub fn resolve(&self, namespace: Namespace, key: &str) -> String {
        for level in self.levels() {
            if let Some(value) = level.get(namespace, key)
                && !value.is_empty()
            {
                return value.to_string();
            }
        }
        String::new()
    }

    /// Probe only the target's own attributes; used when displaying or
    /// editing an instance without leaking inherited values.
    pub fn resolve_self_only(&self, namespace: Namespace, key: &str) -> String {
        self.own
            .get(namespace, key)
            .filter(|v| !v.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}
