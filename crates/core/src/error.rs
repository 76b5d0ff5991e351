//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid size: {0}")]
    SizeParse(String),

    #[error("invalid chunk index {index} for {total} total chunks")]
    InvalidChunkIndex { index: u32, total: u32 },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
