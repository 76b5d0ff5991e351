//! Folder creation and content download.

use crate::error::ApiResult;
use crate::handlers::common::{WalletQuery, read_json, required};
use crate::handlers::uploads::FileResponse;
use crate::identity::require_identity;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

/// `POST /folders` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub name: Option<String>,
    pub wallet_address: Option<String>,
    pub parent_cid: Option<String>,
}

/// POST /folders - Create an empty folder.
#[tracing::instrument(skip(state, req))]
pub async fn create_folder(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    let body: CreateFolderRequest = read_json(req).await?;
    let identity = require_identity(body.wallet_address.as_deref(), "walletAddress")?;
    let name = required(body.name.as_deref(), "name")?;
    let entry = state
        .tree
        .create_folder(&identity, name, body.parent_cid.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(FileResponse::new(entry))))
}

/// `attachment` disposition with a header-safe file name.
fn content_disposition(name: &str) -> HeaderValue {
    let safe: String = name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// GET /files/{cid}?walletAddress= - Stream stored bytes back to the owner.
#[tracing::instrument(skip(state, query), fields(cid = %cid))]
pub async fn download(
    State(state): State<AppState>,
    Path(cid): Path<String>,
    Query(query): Query<WalletQuery>,
) -> ApiResult<Response> {
    let identity = require_identity(query.wallet_address.as_deref(), "walletAddress")?;
    let (row, stream) = state.tree.open(&identity, &cid).await?;

    let content_type = HeaderValue::from_str(&row.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(pinbox_core::file::DEFAULT_MIME_TYPE));
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&row.name));
    Ok(response)
}
