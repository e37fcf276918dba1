//! Domain error types.

use chrono::{DateTime, Utc};

use crate::domain::candidate::CandidateStatus;

/// Failures of the edge-candidate lifecycle and promotion boundary.
///
/// These are recoverable at the candidate level: the operation fails and
/// nothing is written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("candidate {0} not found")]
    NotFound(i64),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: CandidateStatus,
        to: CandidateStatus,
    },

    #[error("manifest field `{field}` is missing or null")]
    MissingField { field: String },

    #[error("manifest field `{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("an identified approver is required")]
    MissingApprover,

    #[error("candidate {candidate_id} is {status}; promotion requires APPROVED")]
    NotApproved {
        candidate_id: i64,
        status: CandidateStatus,
    },

    #[error("candidate {candidate_id} was already promoted as {setup_id}")]
    AlreadyPromoted { candidate_id: i64, setup_id: String },

    #[error("candidate {candidate_id} is no longer {expected}")]
    StaleStatus {
        candidate_id: i64,
        expected: CandidateStatus,
    },
}

/// Coarse classification of an [`OrbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Corrupt or disordered bars. Aborts the affected day only.
    Integrity,
    /// A value read before it was knowable. Halts the whole run.
    Causality,
    /// Lifecycle/promotion validation. Fails the single operation.
    Lifecycle,
    /// Configuration, storage, and I/O problems.
    Environment,
}

/// Top-level error type for orbedge.
#[derive(Debug, thiserror::Error)]
pub enum OrbError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("bar file {path} line {line}: {reason}")]
    BarFile {
        path: String,
        line: u64,
        reason: String,
    },

    #[error("instrument {instrument} has no configured session calendar")]
    Unconfigured { instrument: String },

    #[error("data integrity violation for {instrument} at {at}: {reason}")]
    DataIntegrity {
        instrument: String,
        at: DateTime<Utc>,
        reason: String,
    },

    #[error("lookahead: `{field}` available from {available_from} read at {decision}")]
    Lookahead {
        field: String,
        available_from: DateTime<Utc>,
        decision: DateTime<Utc>,
    },

    #[error(
        "entry price {entry_price} equals an ORB boundary ({orb_low}..{orb_high}) \
         for {instrument} {orb_time} on {trading_day}"
    )]
    EntryAtOrbBoundary {
        instrument: String,
        orb_time: String,
        trading_day: chrono::NaiveDate,
        entry_price: f64,
        orb_high: f64,
        orb_low: f64,
    },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("validated setups out of sync with live view: {summary}")]
    ConfigDrift { summary: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OrbError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OrbError::DataIntegrity { .. } => ErrorClass::Integrity,
            OrbError::Lookahead { .. } | OrbError::EntryAtOrbBoundary { .. } => {
                ErrorClass::Causality
            }
            OrbError::Lifecycle(_) => ErrorClass::Lifecycle,
            _ => ErrorClass::Environment,
        }
    }

    /// Errors that must stop a batch run instead of being confined to one day.
    pub fn is_fatal(&self) -> bool {
        self.class() != ErrorClass::Integrity
    }
}

impl From<&OrbError> for std::process::ExitCode {
    fn from(err: &OrbError) -> Self {
        let code: u8 = match err {
            OrbError::Io(_) | OrbError::BarFile { .. } => 1,
            OrbError::ConfigParse { .. }
            | OrbError::ConfigMissing { .. }
            | OrbError::ConfigInvalid { .. }
            | OrbError::Unconfigured { .. } => 2,
            OrbError::Database { .. } | OrbError::DatabaseQuery { .. } | OrbError::Json(_) => 3,
            OrbError::DataIntegrity { .. } => 4,
            OrbError::Lookahead { .. } | OrbError::EntryAtOrbBoundary { .. } => 5,
            OrbError::Lifecycle(_) => 6,
            OrbError::ConfigDrift { .. } => 7,
        };
        std::process::ExitCode::from(code)
    }
}
