//! Storage quota handlers. The caller is identified by `x-wallet-address`.

use crate::error::ApiResult;
use crate::handlers::common::{read_json, required, size_field};
use crate::identity::WalletHeader;
use crate::ledger::StorageInfo;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use pinbox_core::parse_size;
use serde::{Deserialize, Serialize};

/// `POST /storage/check` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    /// Byte count as a number or decimal string.
    pub file_size: Option<serde_json::Value>,
}

/// Successful capacity check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub success: bool,
    pub remaining: u64,
    pub limit: u64,
    pub used: u64,
}

/// Quota figures with the success flag.
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub success: bool,
    #[serde(flatten)]
    pub info: StorageInfo,
}

impl From<StorageInfo> for InfoResponse {
    fn from(info: StorageInfo) -> Self {
        Self {
            success: true,
            info,
        }
    }
}

/// `POST /storage/purchase` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub transaction_hash: Option<String>,
}

/// POST /storage/check - Would a file of `fileSize` bytes be admitted?
#[tracing::instrument(skip(state, identity, req), fields(identity = %identity.0))]
pub async fn check_storage(
    State(state): State<AppState>,
    identity: WalletHeader,
    req: Request,
) -> ApiResult<Json<CheckResponse>> {
    let body: CheckRequest = read_json(req).await?;
    let requested = parse_size(&size_field(body.file_size.as_ref(), "fileSize")?)?;
    let check = state.ledger.check(&identity.0, requested).await?;
    Ok(Json(CheckResponse {
        success: true,
        remaining: check.remaining,
        limit: check.limit,
        used: check.used,
    }))
}

/// GET /storage/info - Current quota figures.
#[tracing::instrument(skip(state, identity), fields(identity = %identity.0))]
pub async fn storage_info(
    State(state): State<AppState>,
    identity: WalletHeader,
) -> Json<InfoResponse> {
    Json(state.ledger.info(&identity.0).await.into())
}

/// POST /storage/purchase - Credit one plan for a transaction.
#[tracing::instrument(skip(state, identity, req), fields(identity = %identity.0))]
pub async fn purchase_storage(
    State(state): State<AppState>,
    identity: WalletHeader,
    req: Request,
) -> ApiResult<Json<InfoResponse>> {
    let body: PurchaseRequest = read_json(req).await?;
    let transaction_hash = required(body.transaction_hash.as_deref(), "transactionHash")?;
    let info = state.ledger.purchase(&identity.0, transaction_hash).await?;
    Ok(Json(info.into()))
}
