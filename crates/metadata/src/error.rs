//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored size: {0}")]
    InvalidSize(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Map a unique-constraint violation to `AlreadyExists`.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                MetadataError::AlreadyExists(what.into())
            }
            _ => MetadataError::Database(err),
        }
    }
}

impl From<pinbox_core::Error> for MetadataError {
    fn from(err: pinbox_core::Error) -> Self {
        match err {
            pinbox_core::Error::SizeParse(msg) => MetadataError::InvalidSize(msg),
            other => MetadataError::Internal(other.to_string()),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Convert a byte count to the signed column type.
pub(crate) fn to_db_bytes(bytes: u64) -> MetadataResult<i64> {
    i64::try_from(bytes)
        .map_err(|_| MetadataError::Constraint(format!("byte count {bytes} exceeds i64")))
}
