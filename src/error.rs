use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("invalid transfer request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("transient conflict persisted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("response encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
pub const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

pub fn is_retryable_sqlstate(code: &str) -> bool {
    code == SQLSTATE_SERIALIZATION_FAILURE || code == SQLSTATE_DEADLOCK_DETECTED
}

pub fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

pub fn is_serialization_conflict(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref().is_some_and(is_retryable_sqlstate)
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some(SQLSTATE_UNIQUE_VIOLATION)
}
