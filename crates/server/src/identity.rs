//! Caller identity at the request boundary.
//!
//! The wallet address is trusted as-is; it is only normalized here, once,
//! so handlers and services never see a raw spelling.

use crate::error::{ApiError, ApiResult};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use pinbox_core::Identity;

/// Header carrying the caller's wallet address on `/storage/*` routes.
pub const WALLET_HEADER: &str = "x-wallet-address";

/// Normalized identity taken from the `x-wallet-address` header.
#[derive(Debug, Clone)]
pub struct WalletHeader(pub Identity);

impl<S> FromRequestParts<S> for WalletHeader
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(WALLET_HEADER)
            .map(|v| {
                v.to_str().map_err(|_| {
                    ApiError::BadRequest(format!("{WALLET_HEADER} is not valid text"))
                })
            })
            .transpose()?;
        Ok(Self(require_identity(value, WALLET_HEADER)?))
    }
}

/// Normalize a wallet address supplied as a body or query field.
pub fn require_identity(raw: Option<&str>, field: &str) -> ApiResult<Identity> {
    match raw {
        Some(value) if !value.trim().is_empty() => Ok(Identity::parse(value)?),
        _ => Err(ApiError::MissingParameter(field.to_string())),
    }
}
