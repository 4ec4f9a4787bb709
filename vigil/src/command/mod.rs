//! Release commands.
//!
//! Commands run when a new version is deployed; running them is external
//! (process execution lives outside this crate). This module owns their
//! identity, the run bookkeeping (fail ledger slot + next-eligible run
//! time), and the carry-forward of that bookkeeping across config reloads,
//! where the command list may have been reordered or edited.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::metrics::ServiceKey;
use crate::status::{AnnounceType, CommandSummary, SendState, ServiceStatus};
use crate::template::{self, ServiceInfo};

/// One command: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command(pub Vec<String>);

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(argv.into_iter().map(Into::into).collect())
    }

    /// The command's stable identity: its argv rendered as a JSON array
    /// literal, e.g. `["ls","-lah"]`. Carry-forward matching and announce
    /// keys use this exact string.
    pub fn formatted(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Evaluate templating in every argv element.
    pub fn apply_template(&self, info: &ServiceInfo) -> Result<Command> {
        let argv = self
            .0
            .iter()
            .map(|arg| template::render(arg, info))
            .collect::<Result<Vec<String>>>()?;
        Ok(Command(argv))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// The command list of one service, with its run bookkeeping.
pub struct CommandController {
    commands: Vec<Command>,
    next_runnable: RwLock<Vec<Option<DateTime<Utc>>>>,
    status: Arc<ServiceStatus>,
}

impl CommandController {
    /// Create a controller and size the owning status's command ledger.
    pub fn new(commands: Vec<Command>, status: Arc<ServiceStatus>) -> Self {
        status.fails.command.init(commands.len());
        let next_runnable = RwLock::new(vec![None; commands.len()]);
        Self {
            commands,
            next_runnable,
            status,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn command(&self, index: usize) -> &Command {
        &self.commands[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// When the command becomes eligible to run again; `None` means now.
    pub fn next_runnable(&self, index: usize) -> Option<DateTime<Utc>> {
        self.next_runnable.read()[index]
    }

    pub fn set_next_runnable(&self, index: usize, when: DateTime<Utc>) {
        self.next_runnable.write()[index] = Some(when);
    }

    pub fn is_runnable(&self, index: usize) -> bool {
        match self.next_runnable(index) {
            None => true,
            Some(when) => Utc::now() >= when,
        }
    }

    /// Carry run bookkeeping forward from a previous config load.
    ///
    /// The old list may have been reordered or edited, so matching is by
    /// formatted representation, not position. Commands with no match
    /// keep their fresh `Unset` state.
    pub fn copy_fails_from(&self, old: &CommandController) {
        for (new_index, command) in self.commands.iter().enumerate() {
            let formatted = command.formatted();
            for (old_index, old_command) in old.commands.iter().enumerate() {
                if old_command.formatted() != formatted {
                    continue;
                }
                let state = old.status.fails.command.get(old_index);
                if state != SendState::Unset {
                    self.status.fails.command.set(new_index, state);
                }
                if let Some(when) = old.next_runnable(old_index) {
                    self.set_next_runnable(new_index, when);
                }
                break;
            }
        }
    }

    /// Record the outcome of one (externally executed) command run:
    /// ledger, metrics, and a COMMAND/EVENT announce for the UI.
    pub fn record_result(&self, index: usize, success: bool) {
        let state = if success {
            SendState::Pass
        } else {
            SendState::Fail
        };
        self.status.fails.command.set(index, state);

        if let Some(metrics) = self.status.metrics() {
            metrics.record_command_result(
                &ServiceKey {
                    id: self.commands[index].formatted(),
                    service_id: self.status.service_id().to_string(),
                },
                success,
            );
        }

        let mut data = HashMap::new();
        data.insert(
            self.commands[index].formatted(),
            CommandSummary {
                failed: Some(!success),
                next_runnable: self.next_runnable(index),
            },
        );
        self.status.announce_event(AnnounceType::Command, data);
    }

    /// Snapshot of every command's bookkeeping, keyed by formatted
    /// representation; used for full announce payloads.
    pub fn command_data(&self) -> HashMap<String, CommandSummary> {
        self.commands
            .iter()
            .enumerate()
            .map(|(index, command)| {
                (
                    command.formatted(),
                    CommandSummary {
                        failed: self.status.fails.command.get(index).as_failed(),
                        next_runnable: self.next_runnable(index),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    use crate::status::{AnnounceMessage, Sink};

    fn controller(commands: &[&[&str]]) -> CommandController {
        let status = Arc::new(ServiceStatus::new("gitea", "", ""));
        CommandController::new(
            commands.iter().map(|argv| Command::new(argv.to_vec())).collect(),
            status,
        )
    }

    #[test]
    fn test_formatted_is_json_array_literal() {
        let command = Command::new(["ls", "-lah"]);
        assert_eq!(command.formatted(), r#"["ls","-lah"]"#);
        assert_eq!(command.to_string(), "ls -lah");
    }

    #[test]
    fn test_apply_template() {
        let command = Command::new(["./deploy.sh", "{{ latest_version }}"]);
        let info = ServiceInfo {
            latest_version: "1.2.3".to_string(),
            ..Default::default()
        };
        let rendered = command.apply_template(&info).unwrap();
        assert_eq!(rendered.0, vec!["./deploy.sh", "1.2.3"]);
    }

    #[test]
    fn test_new_sizes_ledger() {
        let c = controller(&[&["ls"], &["false"]]);
        assert_eq!(c.status.fails.command.length(), 2);
    }

    #[test]
    fn test_copy_fails_matches_by_content_not_position() {
        let old = controller(&[&["ls", "-lah"]]);
        old.status.fails.command.set(0, SendState::Fail);

        let new = controller(&[&["ls", "-lah"], &["false"]]);
        new.copy_fails_from(&old);

        assert_eq!(new.status.fails.command.get(0), SendState::Fail);
        assert_eq!(new.status.fails.command.get(1), SendState::Unset);
    }

    #[test]
    fn test_copy_fails_survives_reordering() {
        let old = controller(&[&["true"], &["ls", "-lah"]]);
        old.status.fails.command.set(0, SendState::Pass);
        old.status.fails.command.set(1, SendState::Fail);

        let new = controller(&[&["ls", "-lah"], &["true"]]);
        new.copy_fails_from(&old);

        assert_eq!(new.status.fails.command.get(0), SendState::Fail);
        assert_eq!(new.status.fails.command.get(1), SendState::Pass);
    }

    #[test]
    fn test_copy_fails_carries_next_runnable() {
        let old = controller(&[&["ls"]]);
        let when = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        old.set_next_runnable(0, when);

        let new = controller(&[&["false"], &["ls"]]);
        new.copy_fails_from(&old);

        assert_eq!(new.next_runnable(0), None);
        assert_eq!(new.next_runnable(1), Some(when));
    }

    #[test]
    fn test_is_runnable() {
        let c = controller(&[&["ls"]]);
        assert!(c.is_runnable(0));

        c.set_next_runnable(0, Utc::now() + chrono::Duration::hours(1));
        assert!(!c.is_runnable(0));

        c.set_next_runnable(0, Utc::now() - chrono::Duration::hours(1));
        assert!(c.is_runnable(0));
    }

    #[test]
    fn test_record_result_updates_ledger_and_announces() {
        let (tx, mut rx) = mpsc::channel::<AnnounceMessage>(8);
        let status = Arc::new(
            ServiceStatus::new("gitea", "", "").with_announce(Sink::new(tx)),
        );
        let c = CommandController::new(vec![Command::new(["ls", "-lah"])], status.clone());

        c.record_result(0, false);

        assert_eq!(status.fails.command.get(0), SendState::Fail);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.kind, AnnounceType::Command);
        let data = msg.service_data.command_data.unwrap();
        assert_eq!(data[r#"["ls","-lah"]"#].failed, Some(true));
    }

    #[test]
    fn test_command_data_snapshot() {
        let c = controller(&[&["ls"], &["false"]]);
        c.status.fails.command.set(1, SendState::Pass);

        let data = c.command_data();
        assert_eq!(data.len(), 2);
        assert_eq!(data[r#"["ls"]"#].failed, None);
        assert_eq!(data[r#"["false"]"#].failed, Some(false));
    }
}
