use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("validation failed: {0}")]
    Validation(String),
    /// Transient: the session is at `max_participants`. Retryable if a
    /// slot frees up later.
    #[error("session capacity exceeded")]
    CapacityExceeded,
    /// Terminal for the session: no further writes are accepted.
    #[error("session has ended")]
    SessionEnded,
    #[error("database error: {0}")]
    Database(#[from] conclave_db::DbError),
    #[error("internal error: {0}")]
    Internal(String),
}
