use thiserror::Error;
use ulid::Ulid;

/// Engine error taxonomy. Every variant maps to one rejected request; the
/// engine never retries and never leaves partially applied state behind.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("resource {0} is not available for booking")]
    ResourceUnavailable(Ulid),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    Wal(String),
}
