// src/utils/errors.rs
//! Engine error types

use crate::record::{RecordId, RequestState};
use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by engine operations
///
/// None of these are fatal to the process: each one concerns a single record
/// or a single caller request and leaves the store intact.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Edit would leave the held request unsendable; the record stays held
    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    /// A forward/drop decision was already taken for this record
    #[error("record {0} already decided")]
    AlreadyDecided(RecordId),

    /// The record exists but is not waiting for a decision
    #[error("record {0} is not held")]
    NotHeld(RecordId),

    /// Cancel requested for a record with no exchange in flight
    #[error("record {0} has no request in flight")]
    NotInFlight(RecordId),

    /// Replay requested for a record that was never forwarded
    #[error("record {id} is not replayable in state {state}")]
    NotReplayable { id: RecordId, state: RequestState },

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// Patch would move a record backwards or skip a state
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: RecordId,
        from: RequestState,
        to: RequestState,
    },

    #[error("interception failed: {0}")]
    InterceptionFailed(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// Stable label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidEdit(_) => "invalid_edit",
            Self::AlreadyDecided(_) => "already_decided",
            Self::NotHeld(_) => "not_held",
            Self::NotInFlight(_) => "not_in_flight",
            Self::NotReplayable { .. } => "not_replayable",
            Self::RecordNotFound(_) => "record_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InterceptionFailed(_) => "interception_failed",
            Self::NetworkFailure(_) => "network_failure",
            Self::StorageFailed(_) => "storage_failed",
            Self::CompressionFailed(_) => "compression_failed",
            Self::ExportFailed(_) => "export_failed",
            Self::ConfigError(_) => "config_error",
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}
