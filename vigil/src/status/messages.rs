//! Outbound status messages and their sinks.
//!
//! A `ServiceStatus` owns three one-way output channels: the announce
//! broadcast consumed by the UI/WebSocket layer, the persistence channel
//! consumed by the database layer, and a save trigger. All three are
//! fire-and-forget: a missing consumer or a full buffer drops the message
//! rather than blocking the producer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Page identifier shared by all announce messages.
pub const ANNOUNCE_PAGE_APPROVALS: &str = "APPROVALS";

/// Top-level announce message class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnounceType {
    Version,
    Command,
    Webhook,
}

/// Announce message subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnounceSubtype {
    /// First version for a newly-loaded service.
    Init,
    /// A version query completed.
    Query,
    /// A new latest version was found.
    New,
    /// The deployed version changed.
    Updated,
    /// A release was approved or skipped.
    Action,
    /// A command or webhook finished.
    Event,
}

/// Version-field snapshot carried by announce messages.
///
/// Only the fields relevant to the announced change are set; consumers
/// merge them into their own view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_version_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_queried: Option<String>,
}

/// Per-command snapshot keyed by the command's formatted representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_runnable: Option<DateTime<Utc>>,
}

/// Service payload of an announce message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_data: Option<HashMap<String, CommandSummary>>,
}

/// A state-change broadcast to UI/WebSocket consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceMessage {
    pub page: String,
    #[serde(rename = "type")]
    pub kind: AnnounceType,
    pub subtype: AnnounceSubtype,
    pub service_data: ServiceData,
}

impl AnnounceMessage {
    pub fn new(kind: AnnounceType, subtype: AnnounceSubtype, service_data: ServiceData) -> Self {
        Self {
            page: ANNOUNCE_PAGE_APPROVALS.to_string(),
            kind,
            subtype,
            service_data,
        }
    }
}

/// Persistence column names. The database layer relies on these exact
/// strings.
pub mod columns {
    pub const APPROVED_VERSION: &str = "approved_version";
    pub const DEPLOYED_VERSION: &str = "deployed_version";
    pub const DEPLOYED_VERSION_TIMESTAMP: &str = "deployed_version_timestamp";
    pub const LATEST_VERSION: &str = "latest_version";
    pub const LATEST_VERSION_TIMESTAMP: &str = "latest_version_timestamp";
}

/// One changed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub column: String,
    pub value: String,
}

impl Cell {
    pub fn new(column: &str, value: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

/// A version-field change handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistMessage {
    pub service_id: String,
    pub cells: Vec<Cell>,
}

/// An optional, non-blocking message sink.
///
/// `try_send` never blocks: an absent consumer or a full buffer drops the
/// message. Liveness of the producer is prioritized over delivery to
/// UI/DB consumers.
#[derive(Debug, Clone)]
pub struct Sink<T> {
    tx: Option<mpsc::Sender<T>>,
}

impl<T> Sink<T> {
    /// A sink with no consumer; every send is dropped.
    pub fn absent() -> Self {
        Self { tx: None }
    }

    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn is_absent(&self) -> bool {
        self.tx.is_none()
    }

    /// Attempt to deliver `msg`. Returns whether it was accepted.
    pub fn try_send(&self, msg: T) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("sink buffer full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("sink consumer gone, dropping message");
                false
            }
        }
    }
}

impl<T> Default for Sink<T> {
    fn default() -> Self {
        Self::absent()
    }
}
