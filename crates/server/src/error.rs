//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pinbox_core::CapacityError;
use pinbox_metadata::MetadataError;
use pinbox_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("chunk of {size} bytes exceeds the maximum of {limit} bytes")]
    ChunkTooLarge { size: u64, limit: u64 },

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("incomplete upload: chunk {missing} of {total} is missing")]
    IncompleteUpload { missing: u32, total: u32 },

    #[error("{0}")]
    Capacity(#[from] CapacityError),

    #[error("upstream storage error: {0}")]
    Upstream(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid size: {0}")]
    SizeParse(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{0}")]
    Core(#[from] pinbox_core::Error),
}

impl ApiError {
    /// Map a content store failure. Absent content stays a 404.
    pub fn upstream(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => Self::NotFound(what),
            other => Self::Upstream(other.to_string()),
        }
    }

    /// Map a multipart read failure; an exceeded body limit stays a 413.
    pub fn multipart(err: axum::extract::multipart::MultipartError, limit: u64) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge { limit }
        } else {
            Self::BadRequest(format!("invalid multipart body: {}", err.body_text()))
        }
    }

    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingParameter(_) => "missing_parameter",
            Self::ChunkTooLarge { .. } => "chunk_too_large",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::Capacity(CapacityError::OverFreeTierLimit { .. }) => "over_free_tier_limit",
            Self::Capacity(CapacityError::InsufficientCapacity { .. }) => "insufficient_capacity",
            Self::Upstream(_) => "upstream_storage_error",
            Self::NotFound(_) => "not_found_or_unauthorized",
            Self::SizeParse(_) => "size_parse_error",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Storage(StorageError::MissingChunk { .. }) => "incomplete_upload",
            Self::Storage(StorageError::NotFound(_)) => "not_found_or_unauthorized",
            Self::Storage(StorageError::SessionMismatch(_)) => "bad_request",
            Self::Storage(_) => "storage_error",
            Self::Metadata(MetadataError::NotFound(_)) => "not_found_or_unauthorized",
            Self::Metadata(MetadataError::AlreadyExists(_)) => "conflict",
            Self::Metadata(MetadataError::Constraint(_)) => "conflict",
            Self::Metadata(MetadataError::InvalidSize(_)) => "size_parse_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(pinbox_core::Error::SizeParse(_)) => "size_parse_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Self::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::IncompleteUpload { .. } => StatusCode::CONFLICT,
            Self::Capacity(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SizeParse(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::MissingChunk { .. } => StatusCode::CONFLICT,
                StorageError::InvalidKey(_) | StorageError::SessionMismatch(_) => {
                    StatusCode::BAD_REQUEST
                }
                StorageError::Upstream(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                MetadataError::Constraint(_) => StatusCode::CONFLICT,
                MetadataError::InvalidSize(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
