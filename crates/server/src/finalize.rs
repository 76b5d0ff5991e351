//! Upload finalization.
//!
//! Finalize is single-flight per session: an in-process keyed lock rejects
//! concurrent calls on this node and a persisted claim rejects them across
//! restarts. Staging data is removed on every exit path; when the future is
//! dropped mid-way (request timeout, client gone) the cleanup is spawned
//! from `Drop`. Sessions nobody finalizes are removed by the sweeper once
//! they go quiet.

use crate::cache::ListingCache;
use crate::error::{ApiError, ApiResult};
use crate::ledger::QuotaLedger;
use crate::metrics::{
    ACTIVE_FINALIZES, FINALIZE_DURATION, STAGING_CLEANUP_FAILURES, UPLOADS_FINALIZED,
    record_upload_error,
};
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::tree::{discard_unreferenced, file_record, validate_name};
use pinbox_core::upload::FinalizeUploadResponse;
use pinbox_core::{Identity, UploadId, mime_from_name};
use pinbox_metadata::MetadataStore;
use pinbox_metadata::models::ClaimOutcome;
use pinbox_storage::{ContentStore, StagingArea, StorageResult, StoredContent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// A validated finalize request.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub upload_id: UploadId,
    pub file_name: String,
    pub total_chunks: u32,
    pub identity: Identity,
    pub mime_type: Option<String>,
}

/// Turns a complete staging session into a stored, recorded file.
pub struct Finalizer {
    staging: StagingArea,
    content: Arc<dyn ContentStore>,
    metadata: Arc<dyn MetadataStore>,
    ledger: Arc<QuotaLedger>,
    cache: Arc<ListingCache>,
    /// Claims older than this belong to a finalize that never finished.
    stale_after: Duration,
    sessions: KeyedLocks,
    content_locks: Arc<KeyedLocks>,
}

impl Finalizer {
    pub fn new(
        staging: StagingArea,
        content: Arc<dyn ContentStore>,
        metadata: Arc<dyn MetadataStore>,
        ledger: Arc<QuotaLedger>,
        cache: Arc<ListingCache>,
        stale_after: Duration,
        content_locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            staging,
            content,
            metadata,
            ledger,
            cache,
            stale_after,
            sessions: KeyedLocks::new(),
            content_locks,
        }
    }

    fn lock_session(&self, upload_id: &UploadId) -> ApiResult<KeyedGuard> {
        self.sessions.try_lock(upload_id.as_str()).ok_or_else(|| {
            ApiError::Conflict(format!("upload {upload_id} is already being finalized"))
        })
    }

    /// Finalize a session. Calling it again after success returns the stored
    /// result without charging the ledger a second time.
    #[tracing::instrument(skip(self, request), fields(upload_id = %request.upload_id, identity = %request.identity))]
    pub async fn finalize(&self, request: FinalizeRequest) -> ApiResult<FinalizeUploadResponse> {
        let result = self.finalize_locked(&request).await;
        if let Err(e) = &result {
            record_upload_error(e.code());
        }
        result
    }

    async fn finalize_locked(&self, request: &FinalizeRequest) -> ApiResult<FinalizeUploadResponse> {
        let file_name = validate_name(&request.file_name)?;
        let _lock = self.lock_session(&request.upload_id)?;

        let now = OffsetDateTime::now_utc();
        let claim = self
            .metadata
            .claim_finalize(
                request.upload_id.as_str(),
                request.identity.as_str(),
                now,
                now - self.stale_after,
            )
            .await?;

        match claim {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::InProgress => {
                return Err(ApiError::Conflict(format!(
                    "upload {} is already being finalized",
                    request.upload_id
                )));
            }
            ClaimOutcome::Completed(row) => {
                if row.owner != request.identity.as_str() {
                    return Err(ApiError::NotFound(format!("upload {}", request.upload_id)));
                }
                tracing::debug!("upload already finalized, returning stored result");
                return Ok(FinalizeUploadResponse {
                    success: true,
                    cid: row.cid.unwrap_or_default(),
                    name: row.name.unwrap_or(file_name),
                    size: row.size.unwrap_or_default().max(0) as u64,
                });
            }
        }

        let guard = FinalizeGuard::new(
            self.staging.clone(),
            self.metadata.clone(),
            request.upload_id.clone(),
        );
        let start = Instant::now();
        let result = self.finalize_claimed(request, &file_name).await;
        guard.finish(result.is_ok()).await;

        if result.is_ok() {
            UPLOADS_FINALIZED.inc();
            FINALIZE_DURATION.observe(start.elapsed().as_secs_f64());
        }
        result
    }

    async fn finalize_claimed(
        &self,
        request: &FinalizeRequest,
        file_name: &str,
    ) -> ApiResult<FinalizeUploadResponse> {
        let upload_id = &request.upload_id;
        let identity = &request.identity;

        self.staging
            .verify_session(upload_id, request.total_chunks)
            .await?;
        if let Some(missing) = self
            .staging
            .first_missing_chunk(upload_id, request.total_chunks)
            .await?
        {
            return Err(ApiError::IncompleteUpload {
                missing,
                total: request.total_chunks,
            });
        }

        let size = self.staging.assemble(upload_id, request.total_chunks).await?;
        let reservation = self.ledger.reserve(identity, size).await?;

        let (stored, content_guard) = match self.store_assembled(upload_id).await {
            Ok(stored) => stored,
            Err(e) => {
                reservation.release().await;
                return Err(ApiError::upstream(e));
            }
        };
        if stored.size != size {
            tracing::warn!(assembled = size, stored = stored.size, "stored size differs from assembled size");
        }

        let mime_type = request
            .mime_type
            .as_deref()
            .map(str::trim)
            .filter(|mime| !mime.is_empty())
            .unwrap_or_else(|| mime_from_name(file_name));
        let row = file_record(identity, &stored.cid, file_name, size, mime_type, None);

        let completed = self
            .metadata
            .complete_finalize(
                upload_id.as_str(),
                &row,
                reservation.bytes(),
                OffsetDateTime::now_utc(),
            )
            .await;
        drop(content_guard);
        if let Err(e) = completed {
            discard_unreferenced(
                self.metadata.as_ref(),
                self.content.as_ref(),
                &self.content_locks,
                std::slice::from_ref(&stored.cid),
            )
            .await;
            reservation.release().await;
            return Err(e.into());
        }
        reservation.settle();
        self.cache.invalidate(identity.as_str());

        tracing::info!(cid = %stored.cid, size, chunks = request.total_chunks, "upload finalized");
        Ok(FinalizeUploadResponse {
            success: true,
            cid: row.cid,
            name: row.name,
            size,
        })
    }

    /// Copy the assembled artifact into the content store and take the
    /// content lock of its id. Content a concurrent delete removed before the
    /// lock was taken is copied again.
    async fn store_assembled(&self, upload_id: &UploadId) -> StorageResult<(StoredContent, KeyedGuard)> {
        let stream = self.staging.open_assembled(upload_id).await?;
        let stored = self.content.put_stream(stream).await?;
        let guard = self.content_locks.lock(stored.cid.as_str()).await;
        if !self.content.exists(&stored.cid).await? {
            tracing::debug!(cid = %stored.cid, "content removed concurrently, storing again");
            let stream = self.staging.open_assembled(upload_id).await?;
            self.content.put_stream(stream).await?;
        }
        Ok((stored, guard))
    }

    /// Remove staging sessions whose last write is older than `cutoff`.
    /// Sessions being finalized on this node are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_abandoned(&self, cutoff: OffsetDateTime) -> StorageResult<usize> {
        let mut removed = 0;
        for upload_id in self.staging.stale_sessions(cutoff).await? {
            let Some(_session) = self.sessions.try_lock(upload_id.as_str()) else {
                tracing::debug!(upload_id = %upload_id, "session is being finalized, not sweeping");
                continue;
            };
            match self.staging.cleanup(&upload_id).await {
                Ok(objects) => {
                    removed += 1;
                    tracing::info!(upload_id = %upload_id, objects, "abandoned upload session removed");
                }
                Err(e) => {
                    STAGING_CLEANUP_FAILURES.inc();
                    tracing::warn!(upload_id = %upload_id, error = %e, "failed to remove abandoned session");
                }
            }
        }
        Ok(removed)
    }
}

/// Removes staging data and, unless the finalize completed, the claim.
struct FinalizeGuard {
    staging: StagingArea,
    metadata: Arc<dyn MetadataStore>,
    upload_id: UploadId,
    armed: bool,
    runtime_handle: Option<tokio::runtime::Handle>,
}

impl FinalizeGuard {
    fn new(staging: StagingArea, metadata: Arc<dyn MetadataStore>, upload_id: UploadId) -> Self {
        ACTIVE_FINALIZES.inc();
        Self {
            staging,
            metadata,
            upload_id,
            armed: true,
            runtime_handle: tokio::runtime::Handle::try_current().ok(),
        }
    }

    async fn finish(mut self, completed: bool) {
        self.armed = false;
        ACTIVE_FINALIZES.dec();
        cleanup_session(&self.staging, self.metadata.as_ref(), &self.upload_id, completed).await;
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        ACTIVE_FINALIZES.dec();
        let Some(handle) = self.runtime_handle.as_ref() else {
            tracing::warn!(upload_id = %self.upload_id, "finalize abandoned without runtime handle, staging data left behind");
            return;
        };
        let staging = self.staging.clone();
        let metadata = self.metadata.clone();
        let upload_id = self.upload_id.clone();
        handle.spawn(async move {
            tracing::warn!(upload_id = %upload_id, "finalize abandoned, cleaning up");
            cleanup_session(&staging, metadata.as_ref(), &upload_id, false).await;
        });
    }
}

async fn cleanup_session(
    staging: &StagingArea,
    metadata: &dyn MetadataStore,
    upload_id: &UploadId,
    completed: bool,
) {
    if !completed && let Err(e) = metadata.release_finalize(upload_id.as_str()).await {
        tracing::error!(upload_id = %upload_id, error = %e, "failed to release finalize claim");
    }
    match staging.cleanup(upload_id).await {
        Ok(removed) => tracing::debug!(upload_id = %upload_id, removed, "staging cleaned up"),
        Err(e) => {
            STAGING_CLEANUP_FAILURES.inc();
            tracing::warn!(upload_id = %upload_id, error = %e, "staging cleanup failed");
        }
    }
}
