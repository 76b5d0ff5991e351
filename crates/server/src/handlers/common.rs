//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Maximum size of a JSON request body (64 KiB).
pub const MAX_JSON_BODY_SIZE: usize = 64 * 1024;

/// Read and parse a JSON body, reporting failures in the API error format.
pub async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// `?walletAddress=` query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletQuery {
    pub wallet_address: Option<String>,
}

/// A byte count sent either as a JSON number or as a decimal string.
pub fn size_field(value: Option<&serde_json::Value>, field: &str) -> ApiResult<String> {
    match value {
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ApiError::SizeParse(format!(
            "{field} must be a byte count, got {other}"
        ))),
        None => Err(ApiError::SizeParse(format!("{field} is required"))),
    }
}

/// Required, non-blank string field.
pub fn required<'a>(value: Option<&'a str>, field: &str) -> ApiResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::MissingParameter(field.to_string()))
}
