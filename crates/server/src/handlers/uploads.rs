//! Upload and file tree handlers.

use crate::error::{ApiError, ApiResult};
use crate::finalize::FinalizeRequest;
use crate::handlers::common::{WalletQuery, read_json, required, size_field};
use crate::identity::require_identity;
use crate::routes::{chunk_body_limit, direct_upload_body_limit};
use crate::state::AppState;
use crate::tree::{ExternalFile, NewUpload};
use axum::Json;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use bytes::Bytes;
use pinbox_core::upload::{ChunkAck, FinalizeUploadRequest, FinalizeUploadResponse};
use pinbox_core::{FileEntry, UploadId};
use serde::{Deserialize, Serialize};

/// Response carrying one created or updated record.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub success: bool,
    pub file: FileEntry,
    /// Files extracted when the upload was an archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<usize>,
}

impl FileResponse {
    pub fn new(file: FileEntry) -> Self {
        Self {
            success: true,
            file,
            extracted: None,
        }
    }
}

/// Listing response.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub success: bool,
    pub files: Vec<FileEntry>,
}

/// Delete response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    pub removed: usize,
    pub freed_bytes: u64,
}

/// Register an externally stored file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub file_name: Option<String>,
    pub cid: Option<String>,
    /// Byte count as a number or decimal string.
    pub size: Option<serde_json::Value>,
    pub mime_type: Option<String>,
    pub wallet_address: Option<String>,
    pub parent_cid: Option<String>,
}

/// `DELETE /upload` query parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    pub cid: Option<String>,
    pub wallet_address: Option<String>,
}

/// `PATCH /upload` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub cid: Option<String>,
    pub wallet_address: Option<String>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

fn parse_u32(raw: &str, field: &str) -> ApiResult<u32> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be a non-negative integer")))
}

/// POST /upload-chunk - Stage one chunk of a chunked upload.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkAck>> {
    let body_limit = chunk_body_limit(state.ingestor.max_chunk_size()) as u64;
    let multipart_err = |e| ApiError::multipart(e, body_limit);

    let mut chunk: Option<Bytes> = None;
    let mut upload_id = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut file_name = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chunk" => chunk = Some(field.bytes().await.map_err(multipart_err)?),
            "uploadId" => upload_id = Some(field.text().await.map_err(multipart_err)?),
            "chunkIndex" => chunk_index = Some(field.text().await.map_err(multipart_err)?),
            "totalChunks" => total_chunks = Some(field.text().await.map_err(multipart_err)?),
            "fileName" => file_name = Some(field.text().await.map_err(multipart_err)?),
            _ => {}
        }
    }

    let chunk = chunk.ok_or_else(|| ApiError::MissingParameter("chunk".to_string()))?;
    let upload_id = required(upload_id.as_deref(), "uploadId")?;
    let index = parse_u32(required(chunk_index.as_deref(), "chunkIndex")?, "chunkIndex")?;
    let total = parse_u32(required(total_chunks.as_deref(), "totalChunks")?, "totalChunks")?;
    required(file_name.as_deref(), "fileName")?;

    let upload_id =
        UploadId::parse(upload_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let ack = state.ingestor.ingest(&upload_id, index, total, chunk).await?;
    Ok(Json(ack))
}

/// POST /finalize-upload - Assemble, store and record a chunked upload.
#[tracing::instrument(skip(state, req))]
pub async fn finalize_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<FinalizeUploadResponse>> {
    let body: FinalizeUploadRequest = read_json(req).await?;

    let upload_id = required(body.upload_id.as_deref(), "uploadId")?;
    let upload_id =
        UploadId::parse(upload_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let file_name = required(body.file_name.as_deref(), "fileName")?.to_string();
    let total_chunks = body
        .total_chunks
        .ok_or_else(|| ApiError::MissingParameter("totalChunks".to_string()))?;
    if total_chunks == 0 {
        return Err(ApiError::BadRequest(
            "totalChunks must be at least 1".to_string(),
        ));
    }
    let identity = require_identity(body.wallet_address.as_deref(), "walletAddress")?;

    let response = state
        .finalizer
        .finalize(FinalizeRequest {
            upload_id,
            file_name,
            total_chunks,
            identity,
            mime_type: body.file_type,
        })
        .await?;
    Ok(Json(response))
}

/// POST /upload - Direct upload (multipart) or registration of external
/// content (JSON).
#[tracing::instrument(skip(state, req))]
pub async fn upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        direct_upload(&state, multipart).await
    } else {
        let body: RegisterRequest = read_json(req).await?;
        register(&state, body).await
    }
}

async fn direct_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    let body_limit = direct_upload_body_limit(state.config.server.max_direct_upload_bytes) as u64;
    let multipart_err = |e| ApiError::multipart(e, body_limit);

    let mut data: Option<Bytes> = None;
    let mut part_name = None;
    let mut part_type = None;
    let mut file_name = None;
    let mut wallet_address = None;
    let mut parent_cid = None;
    let mut expand = true;

    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                part_name = field.file_name().map(str::to_string);
                part_type = field.content_type().map(str::to_string);
                data = Some(field.bytes().await.map_err(multipart_err)?);
            }
            "fileName" => file_name = Some(field.text().await.map_err(multipart_err)?),
            "walletAddress" => wallet_address = Some(field.text().await.map_err(multipart_err)?),
            "parentCid" => parent_cid = Some(field.text().await.map_err(multipart_err)?),
            "expand" => {
                let raw = field.text().await.map_err(multipart_err)?;
                expand = !matches!(raw.trim(), "false" | "0" | "no");
            }
            _ => {}
        }
    }

    let identity = require_identity(wallet_address.as_deref(), "walletAddress")?;
    let data = data.ok_or_else(|| ApiError::MissingParameter("file".to_string()))?;
    let file_name = file_name
        .filter(|n| !n.trim().is_empty())
        .or(part_name)
        .ok_or_else(|| ApiError::MissingParameter("fileName".to_string()))?;

    let uploaded = state
        .tree
        .upload(
            &identity,
            NewUpload {
                file_name,
                mime_type: part_type,
                parent_cid,
                expand,
                data,
            },
        )
        .await?;

    let extracted = (uploaded.extracted > 0).then_some(uploaded.extracted);
    Ok((
        StatusCode::CREATED,
        Json(FileResponse {
            success: true,
            file: uploaded.entry,
            extracted,
        }),
    ))
}

async fn register(
    state: &AppState,
    body: RegisterRequest,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    let identity = require_identity(body.wallet_address.as_deref(), "walletAddress")?;
    let file_name = required(body.file_name.as_deref(), "fileName")?.to_string();
    let cid = required(body.cid.as_deref(), "cid")?.to_string();
    let size = size_field(body.size.as_ref(), "size")?;

    let entry = state
        .tree
        .register(
            &identity,
            ExternalFile {
                file_name,
                cid,
                size,
                mime_type: body.mime_type,
                parent_cid: body.parent_cid,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(FileResponse::new(entry))))
}

/// GET /upload?walletAddress= - List the caller's files and folders.
#[tracing::instrument(skip(state, query))]
pub async fn list_uploads(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> ApiResult<Json<ListResponse>> {
    let identity = require_identity(query.wallet_address.as_deref(), "walletAddress")?;
    let files = state.tree.list(&identity).await?;
    Ok(Json(ListResponse {
        success: true,
        files: files.as_ref().clone(),
    }))
}

/// DELETE /upload?cid=&walletAddress= - Delete a record and its descendants.
#[tracing::instrument(skip(state, query))]
pub async fn delete_upload(
    State(state): State<AppState>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    let cid = required(query.cid.as_deref(), "cid")?;
    let identity = require_identity(query.wallet_address.as_deref(), "walletAddress")?;
    let outcome = state.tree.delete(&identity, cid).await?;
    Ok(Json(DeleteResponse {
        success: true,
        removed: outcome.removed,
        freed_bytes: outcome.freed_bytes,
    }))
}

/// PATCH /upload - Rename a record or change its MIME type.
#[tracing::instrument(skip(state, req))]
pub async fn patch_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<FileResponse>> {
    let body: PatchRequest = read_json(req).await?;
    let cid = required(body.cid.as_deref(), "cid")?;
    let identity = require_identity(body.wallet_address.as_deref(), "walletAddress")?;
    let entry = state
        .tree
        .update(
            &identity,
            cid,
            body.name.as_deref(),
            body.mime_type.as_deref(),
        )
        .await?;
    Ok(Json(FileResponse::new(entry)))
}
