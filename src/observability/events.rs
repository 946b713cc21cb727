//! Observable events
//!
//! Every log line emitted by the persistence layer uses one of these names.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Configuration loaded
    ConfigLoaded,
    /// Primary database opened (and upgraded if needed)
    PrimaryOpened,
    /// Primary database could not be opened
    PrimaryOpenFailed,
    /// Schema version raised on disk
    SchemaUpgraded,
    /// Session switched to the fallback medium
    FallbackActivated,
    /// Fallback writes of an earlier session replayed onto the primary medium
    FallbackReconciled,

    // Data operations
    /// A write failed on one medium
    WriteFailed,
    /// A read failed on one medium
    ReadFailed,
    /// Checksum mismatch on read
    CorruptionDetected,
    /// A torn trailing record was cut off during open
    TornTailTruncated,
    /// Store logs rewritten without dead records
    CompactionComplete,

    // Migration
    /// Migration skipped because it already completed
    MigrationAlreadyComplete,
    /// Another invocation holds the migration claim
    MigrationClaimLost,
    /// A single legacy record could not be migrated
    MigrationItemFailed,
    /// A legacy source could not be read; its records are skipped
    MigrationSourceFailed,
    /// Migration state machine moved to a new phase
    MigrationPhaseChanged,

    // Transfer
    /// Bundle rejected before any mutation
    ImportRejected,
    /// A bundle store could not be imported
    ImportStoreFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::PrimaryOpened => "PRIMARY_OPENED",
            Event::PrimaryOpenFailed => "PRIMARY_OPEN_FAILED",
            Event::SchemaUpgraded => "SCHEMA_UPGRADED",
            Event::FallbackActivated => "FALLBACK_ACTIVATED",
            Event::FallbackReconciled => "FALLBACK_RECONCILED",
            Event::WriteFailed => "WRITE_FAILED",
            Event::ReadFailed => "READ_FAILED",
            Event::CorruptionDetected => "CORRUPTION_DETECTED",
            Event::TornTailTruncated => "TORN_TAIL_TRUNCATED",
            Event::CompactionComplete => "COMPACTION_COMPLETE",
            Event::MigrationAlreadyComplete => "MIGRATION_ALREADY_COMPLETE",
            Event::MigrationClaimLost => "MIGRATION_CLAIM_LOST",
            Event::MigrationItemFailed => "MIGRATION_ITEM_FAILED",
            Event::MigrationSourceFailed => "MIGRATION_SOURCE_FAILED",
            Event::MigrationPhaseChanged => "MIGRATION_PHASE_CHANGED",
            Event::ImportRejected => "IMPORT_REJECTED",
            Event::ImportStoreFailed => "IMPORT_STORE_FAILED",
        }
    }

    /// Default severity for this event
    pub fn severity(&self) -> Severity {
        match self {
            Event::PrimaryOpenFailed
            | Event::FallbackActivated
            | Event::CorruptionDetected
            | Event::TornTailTruncated
            | Event::MigrationClaimLost
            | Event::MigrationItemFailed
            | Event::MigrationSourceFailed
            | Event::ImportRejected
            | Event::ImportStoreFailed => Severity::Warn,
            Event::WriteFailed | Event::ReadFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake_case() {
        let events = [
            Event::ConfigLoaded,
            Event::PrimaryOpened,
            Event::PrimaryOpenFailed,
            Event::SchemaUpgraded,
            Event::FallbackActivated,
            Event::FallbackReconciled,
            Event::WriteFailed,
            Event::ReadFailed,
            Event::CorruptionDetected,
            Event::TornTailTruncated,
            Event::CompactionComplete,
            Event::MigrationAlreadyComplete,
            Event::MigrationClaimLost,
            Event::MigrationItemFailed,
            Event::MigrationSourceFailed,
            Event::MigrationPhaseChanged,
            Event::ImportRejected,
            Event::ImportStoreFailed,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_degradations_are_warnings() {
        assert_eq!(Event::FallbackActivated.severity(), Severity::Warn);
        assert_eq!(Event::CorruptionDetected.severity(), Severity::Warn);
        assert_eq!(Event::WriteFailed.severity(), Severity::Error);
        assert_eq!(Event::PrimaryOpened.severity(), Severity::Info);
    }
}
