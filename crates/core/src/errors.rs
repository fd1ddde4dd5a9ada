//! Error types for the Olimpiada core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Constructed through the manual `From<DatabaseError>` impl below so
    /// that wrapped rejections surface as their domain variant.
    #[error(transparent)]
    Database(DatabaseError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

// ---------------------------------------------------------------------------
// Schedule range errors
// ---------------------------------------------------------------------------

/// A proposed schedule violates ordering or contiguity with its neighbors.
///
/// Always carries the computed bounds so the operator can correct the input.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeError {
    /// `end_date` is before `start_date`.
    #[error("end date {end} is before start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },

    /// `start_date` is earlier than the allowed minimum.
    #[error("start date {start} is before the earliest allowed date {min_start}")]
    StartTooEarly {
        start: NaiveDate,
        min_start: NaiveDate,
        max_end: Option<NaiveDate>,
    },

    /// `end_date` overlaps the next configured phase.
    #[error("end date {end} is after the latest allowed date {max_end}")]
    EndTooLate {
        end: NaiveDate,
        min_start: NaiveDate,
        max_end: NaiveDate,
    },

    /// The window overlaps a configured phase that is not an immediate neighbor.
    #[error("window {start}..{end} overlaps phase '{conflicting}' ending {conflicting_end}")]
    Overlaps {
        start: NaiveDate,
        end: NaiveDate,
        conflicting: String,
        conflicting_start: NaiveDate,
        conflicting_end: NaiveDate,
    },

    /// The phase is already finished and the policy forbids re-scheduling it.
    #[error("phase '{phase}' is already finished and cannot be re-scheduled")]
    PhaseFinalized { phase: String },
}

// ---------------------------------------------------------------------------
// Sub-phase transition errors
// ---------------------------------------------------------------------------

/// A sub-phase status transition was rejected by its guard.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionError {
    /// The predecessor in the same (area, level) track is not finalized.
    #[error("sub-phase '{sub_phase}' cannot start: predecessor '{blocking}' is not finalized")]
    SequenceViolation { sub_phase: String, blocking: String },

    /// The current status does not permit the requested target.
    #[error("sub-phase '{sub_phase}' cannot move from {from} to {to}")]
    InvalidState {
        sub_phase: String,
        from: String,
        to: String,
    },

    /// The persisted status changed between read and write.
    #[error("sub-phase '{sub_phase}' is no longer {expected}; reload and retry")]
    StaleStatus { sub_phase: String, expected: String },
}

// ---------------------------------------------------------------------------
// Permission matrix errors
// ---------------------------------------------------------------------------

/// Errors raised while reading or replacing a permission matrix.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatrixError {
    /// A stored matrix is missing a cell. Reads treat the cell as `false`.
    #[error("permission matrix '{matrix}' is missing {missing} cell(s)")]
    Integrity { matrix: String, missing: usize },

    /// A submitted row references a row key (phase/role) not in the catalog.
    #[error("unknown {key_kind} id {id} in permission matrix")]
    UnknownKey { key_kind: String, id: i64 },

    /// A submitted row references an action not in the catalog.
    #[error("unknown action id {0} in permission matrix")]
    UnknownAction(i64),

    /// The same cell was submitted twice with different values.
    #[error("duplicate cell ({key}, {action_id}) in permission matrix")]
    DuplicateCell { key: i64, action_id: i64 },
}

// ---------------------------------------------------------------------------
// Cycle errors
// ---------------------------------------------------------------------------

/// Errors from cycle (gestión) management and catalog operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleError {
    /// No gestión is marked as current.
    #[error("no current cycle has been initialized")]
    NoCurrentCycle,

    /// A gestión for the requested year already exists.
    #[error("a cycle for year {0} already exists")]
    DuplicateYear(i32),

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A supplied value is invalid.
    #[error("invalid value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored value could not be decoded.
    #[error("corrupt {entity} row: {detail}")]
    Corrupt { entity: String, detail: String },

    /// A guarded write was rejected inside the transaction.
    #[error(transparent)]
    Rejected(Box<CoreError>),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DatabaseError {
    /// Wrap a domain rejection so it can abort a [`crate::db::Database::transaction`].
    pub fn rejected(err: impl Into<CoreError>) -> Self {
        Self::Rejected(Box::new(err.into()))
    }
}

impl From<DatabaseError> for CoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Rejected(inner) => *inner,
            other => CoreError::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_error_display_messages() {
        let err = RangeError::EndBeforeStart {
            start: day("2025-03-10"),
            end: day("2025-03-01"),
        };
        assert_eq!(
            err.to_string(),
            "end date 2025-03-01 is before start date 2025-03-10"
        );

        let err = TransitionError::SequenceViolation {
            sub_phase: "Ronda 2".into(),
            blocking: "Ronda 1".into(),
        };
        assert!(err.to_string().contains("Ronda 1"));

        let err = CycleError::DuplicateYear(2025);
        assert!(err.to_string().contains("2025"));
    }

    #[test]
    fn test_domain_errors_serialize_with_kind_tag() {
        let json = serde_json::to_value(MatrixError::UnknownKey {
            key_kind: "phase".into(),
            id: 7,
        })
        .unwrap();
        assert_eq!(json["kind"], "unknown_key");
        assert_eq!(json["key_kind"], "phase");
        assert_eq!(json["id"], 7);

        let json = serde_json::to_value(RangeError::Overlaps {
            start: day("2025-01-15"),
            end: day("2025-01-20"),
            conflicting: "Configuración".into(),
            conflicting_start: day("2025-01-10"),
            conflicting_end: day("2025-01-31"),
        })
        .unwrap();
        assert_eq!(json["kind"], "overlaps");
        assert_eq!(json["conflicting_end"], "2025-01-31");
    }

    #[test]
    fn test_rejected_unwraps_into_domain_error() {
        let db_err = DatabaseError::rejected(TransitionError::InvalidState {
            sub_phase: "Ronda 1".into(),
            from: "FINALIZADA".into(),
            to: "FINALIZADA".into(),
        });
        let core_err: CoreError = db_err.into();
        assert!(matches!(
            core_err,
            CoreError::Transition(TransitionError::InvalidState { .. })
        ));

        let db_err = DatabaseError::NotFound {
            entity: "sub_phase".into(),
            id: "7".into(),
        };
        let core_err: CoreError = db_err.into();
        assert!(matches!(core_err, CoreError::Database(_)));
    }
}
