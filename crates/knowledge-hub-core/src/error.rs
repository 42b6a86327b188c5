//! Error type shared by every store implementation.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A value could not be cast to an [`ObjectId`](crate::ObjectId).
    #[error("Cast to ObjectId failed for value \"{0}\"")]
    InvalidId(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A document failed validation before being written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A unique index rejected the write.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(err.into())
    }
}
