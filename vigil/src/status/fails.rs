//! Tri-state send-outcome ledgers.
//!
//! Every sender class (command, notification target, webhook) tracks the
//! outcome of its most recent dispatch per unit: never attempted, passed,
//! or failed. Commands are index-addressed (the command list has a fixed
//! length per config load); notification targets and webhooks are keyed by
//! stable ID since they can be added and removed at runtime.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Outcome of the most recent send attempt for one tracked unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendState {
    /// No attempt has been made yet.
    #[default]
    Unset,
    /// The last attempt succeeded.
    Pass,
    /// The last attempt failed.
    Fail,
}

impl SendState {
    /// The failed-flag view used by announce payloads: `None` until an
    /// attempt has been made.
    pub fn as_failed(&self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::Pass => Some(false),
            Self::Fail => Some(true),
        }
    }

    /// Diagnostic rendering of the failed-flag.
    pub fn report_str(&self) -> &'static str {
        match self {
            Self::Unset => "nil",
            Self::Pass => "false",
            Self::Fail => "true",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Index-addressed ledger for a fixed-length command list.
#[derive(Debug, Default)]
pub struct CommandFails {
    states: RwLock<Vec<SendState>>,
}

impl CommandFails {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)allocate storage for `capacity` commands, all `Unset`.
    pub fn init(&self, capacity: usize) {
        *self.states.write() = vec![SendState::Unset; capacity];
    }

    /// Positional read. Out-of-range access is a programmer error.
    pub fn get(&self, index: usize) -> SendState {
        self.states.read()[index]
    }

    /// Positional write. Out-of-range access is a programmer error.
    pub fn set(&self, index: usize, state: SendState) {
        self.states.write()[index] = state;
    }

    /// Set every existing entry back to `Unset`.
    pub fn reset(&self) {
        for state in self.states.write().iter_mut() {
            *state = SendState::Unset;
        }
    }

    /// True iff every entry is exactly `Pass` (trivially true when empty).
    pub fn all_passed(&self) -> bool {
        self.states.read().iter().all(SendState::is_pass)
    }

    pub fn length(&self) -> usize {
        self.states.read().len()
    }

    /// Copy of the current states, in index order.
    pub fn snapshot(&self) -> Vec<SendState> {
        self.states.read().clone()
    }
}

impl std::fmt::Display for CommandFails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, state) in self.states.read().iter().enumerate() {
            writeln!(f, "{}: {}", index, state.report_str())?;
        }
        Ok(())
    }
}

/// Keyed ledger for units addressed by stable string ID.
#[derive(Debug, Default)]
pub struct TargetFails {
    states: RwLock<HashMap<String, SendState>>,
}

impl TargetFails {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)allocate storage sized for `capacity` units.
    pub fn init(&self, capacity: usize) {
        *self.states.write() = HashMap::with_capacity(capacity);
    }

    /// Read a unit's state; unknown keys read as `Unset`.
    pub fn get(&self, key: &str) -> SendState {
        self.states.read().get(key).copied().unwrap_or_default()
    }

    pub fn set(&self, key: &str, state: SendState) {
        self.states.write().insert(key.to_string(), state);
    }

    /// Drop a unit from the ledger entirely (target deleted).
    pub fn remove(&self, key: &str) {
        self.states.write().remove(key);
    }

    /// Set every existing entry back to `Unset`, retaining the keys.
    pub fn reset(&self) {
        for state in self.states.write().values_mut() {
            *state = SendState::Unset;
        }
    }

    /// True iff every entry is exactly `Pass` (trivially true when empty).
    pub fn all_passed(&self) -> bool {
        self.states.read().values().all(SendState::is_pass)
    }

    pub fn length(&self) -> usize {
        self.states.read().len()
    }
}

impl std::fmt::Display for TargetFails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states = self.states.read();
        let mut keys: Vec<&String> = states.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(f, "{}: {}", key, states[key].report_str())?;
        }
        Ok(())
    }
}

/// The ledger triple owned by one service's status.
#[derive(Debug, Default)]
pub struct StatusFails {
    pub command: CommandFails,
    pub notify: TargetFails,
    pub webhook: TargetFails,
}

impl StatusFails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all three ledgers to `Unset`. A redeploy invalidates prior
    /// command/notification/webhook outcomes.
    pub fn reset_all(&self) {
        self.command.reset();
        self.notify.reset();
        self.webhook.reset();
    }
}

impl std::fmt::Display for StatusFails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.command.length() > 0 {
            write!(f, "command:\n{}", self.command)?;
        }
        if self.notify.length() > 0 {
            write!(f, "notify:\n{}", self.notify)?;
        }
        if self.webhook.length() > 0 {
            write!(f, "webhook:\n{}", self.webhook)?;
        }
        Ok(())
    }
}
