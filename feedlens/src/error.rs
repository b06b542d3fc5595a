//! Typed errors at the Store boundary. Everything above the Store speaks
//! `anyhow::Result`, matching the teacher's split between `thiserror` at
//! library seams and `anyhow` in application/worker code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database locked: {0}")]
    Locked(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Classify a raw sqlx error, matching spec.md §4.4's retry predicate:
    /// retry only on errors whose message matches "locked"/"SQLITE_BUSY".
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let msg = err.to_string();
        let lowered = msg.to_lowercase();
        if lowered.contains("locked") || lowered.contains("sqlite_busy") || lowered.contains("busy") {
            StoreError::Locked(msg)
        } else {
            StoreError::Sqlx(err)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Locked(_))
    }
}
