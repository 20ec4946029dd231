use thiserror::Error;

/// Failures loading or saving host-side inputs around a pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    #[error("invalid event: {0}")]
    Event(String),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
