//! Typed error hierarchy for the audit pipeline.
//!
//! - `OrchestratorError`: phase state machine failures
//! - `StoreError`: persistence failures callers may match on
//! - `ConfigError`: configuration loading failures
//!
//! Check-level failures have no error type. The executor turns them into
//! `not_applicable` results.

use siteaudit_common::AuditStatus;
use thiserror::Error;

/// Errors from the orchestrator (one audit run).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Audit {id} not found")]
    AuditNotFound { id: i64 },

    #[error("Audit {id} already started (status: {status})")]
    AlreadyStarted { id: i64, status: AuditStatus },

    #[error("Phase {phase} failed")]
    PhaseFailed {
        phase: AuditStatus,
        #[source]
        source: anyhow::Error,
    },

    #[error("Audit {id} cancelled while waiting for check results")]
    Cancelled { id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Phase the run stopped in, when the failure came from a phase.
    pub fn phase(&self) -> Option<AuditStatus> {
        match self {
            Self::PhaseFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Errors from the SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid stored value in {column}: {message}")]
    InvalidColumn { column: String, message: String },

    #[error("Illegal audit transition {from} -> {to}")]
    IllegalTransition { from: AuditStatus, to: AuditStatus },

    #[error("Page {page_id} cannot be tested before its data collection is complete")]
    PageNotCollected { page_id: i64 },
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ParseFailed(#[source] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
