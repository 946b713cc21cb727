//! Migration state machine
//!
//! Allowed transitions:
//!
//! ```text
//! NotStarted -> Scanning -> Migrating -> Completed
//!                               |            ^
//!                               v            |
//!                          FailedPartial ----+
//! ```
//!
//! Transitions are explicit; nothing moves the phase except the coordinator.
//! The state is persisted as a record in the `system` store and every write
//! of it is a compare-and-swap against the value last read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{MigrationError, MigrationResult};

/// Key of the state record inside the `system` store
pub const MIGRATION_STATE_KEY: &str = "migration-state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    #[default]
    NotStarted,
    Scanning,
    Migrating,
    /// Some items failed; still reaches `Completed`
    FailedPartial,
    Completed,
}

impl MigrationPhase {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationPhase::NotStarted => "NotStarted",
            MigrationPhase::Scanning => "Scanning",
            MigrationPhase::Migrating => "Migrating",
            MigrationPhase::FailedPartial => "FailedPartial",
            MigrationPhase::Completed => "Completed",
        }
    }

    pub fn can_transition_to(&self, next: MigrationPhase) -> bool {
        use MigrationPhase::*;
        matches!(
            (self, next),
            (NotStarted, Scanning)
                | (Scanning, Migrating)
                | (Migrating, Completed)
                | (Migrating, FailedPartial)
                | (FailedPartial, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationPhase::Completed)
    }
}

/// Persisted migration progress
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub phase: MigrationPhase,
    /// Claim holder, a uuid per run
    #[serde(default)]
    pub owner: Option<String>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub discovered: u64,
    #[serde(default)]
    pub migrated: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub failed: u64,
}

impl MigrationState {
    /// Parses a stored state. `None` means no record, i.e. not started.
    pub fn from_stored(value: Option<Value>) -> MigrationResult<Self> {
        match value {
            None => Ok(Self::default()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| MigrationError::StateUnreadable(e.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        // A struct of plain fields always serializes
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Returns a copy moved to `next`, or an error if the edge is not allowed
    pub fn transition(&self, next: MigrationPhase) -> MigrationResult<Self> {
        if !self.phase.can_transition_to(next) {
            return Err(MigrationError::ForbiddenTransition {
                from: self.phase.name(),
                to: next.name(),
            });
        }
        Ok(Self {
            phase: next,
            ..self.clone()
        })
    }

    /// Copies the item counters of `tally`
    pub fn with_counts(mut self, tally: &MigrationState) -> Self {
        self.discovered = tally.discovered;
        self.migrated = tally.migrated;
        self.skipped = tally.skipped;
        self.failed = tally.failed;
        self
    }

    /// Whether another owner holds a claim that has not expired at `now`
    pub fn held_by_other(&self, owner: &str, now: i64, lease_ms: i64) -> bool {
        if matches!(self.phase, MigrationPhase::NotStarted | MigrationPhase::Completed) {
            return false;
        }
        let live = self.started_at.is_some_and(|started| now - started < lease_ms);
        live && self.owner.as_deref() != Some(owner)
    }

    /// A fresh claim for `owner`. A stale claim is restarted from the top.
    pub fn claim(owner: &str, now: i64) -> Self {
        Self {
            phase: MigrationPhase::Scanning,
            owner: Some(owner.to_string()),
            started_at: Some(now),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allowed_transitions() {
        use MigrationPhase::*;
        assert!(NotStarted.can_transition_to(Scanning));
        assert!(Scanning.can_transition_to(Migrating));
        assert!(Migrating.can_transition_to(Completed));
        assert!(Migrating.can_transition_to(FailedPartial));
        assert!(FailedPartial.can_transition_to(Completed));
    }

    #[test]
    fn test_forbidden_transitions() {
        use MigrationPhase::*;
        assert!(!NotStarted.can_transition_to(Completed));
        assert!(!Scanning.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Scanning));
        assert!(!FailedPartial.can_transition_to(Migrating));

        let state = MigrationState::default();
        let err = state.transition(Migrating).unwrap_err();
        assert!(matches!(err, MigrationError::ForbiddenTransition { .. }));
    }

    #[test]
    fn test_missing_record_is_not_started() {
        let state = MigrationState::from_stored(None).unwrap();
        assert_eq!(state.phase, MigrationPhase::NotStarted);
    }

    #[test]
    fn test_stored_shape() {
        let state = MigrationState::claim("owner-1", 1_000);
        let value = state.to_value();
        assert_eq!(value["phase"], json!("scanning"));
        assert_eq!(value["startedAt"], json!(1_000));
        assert_eq!(MigrationState::from_stored(Some(value)).unwrap(), state);

        assert!(MigrationState::from_stored(Some(json!({"phase": "bogus"}))).is_err());
    }

    #[test]
    fn test_lease() {
        let state = MigrationState::claim("a", 1_000);
        assert!(state.held_by_other("b", 1_500, 1_000));
        assert!(!state.held_by_other("b", 2_500, 1_000));
        assert!(!state.held_by_other("a", 1_500, 1_000));

        let done = MigrationState {
            phase: MigrationPhase::Completed,
            ..state
        };
        assert!(!done.held_by_other("b", 1_500, 1_000));
    }
}
