//! Finalize claim repository.

use crate::error::MetadataResult;
use crate::models::{ClaimOutcome, FileRow, FinalizeClaimRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for single-flight finalize claims.
#[async_trait]
pub trait FinalizeRepo: Send + Sync {
    /// Try to claim an upload session.
    ///
    /// A claim still in `claimed` state and older than `stale_before` is
    /// taken over; it belongs to a finalize that never finished.
    async fn claim_finalize(
        &self,
        upload_id: &str,
        owner: &str,
        now: OffsetDateTime,
        stale_before: OffsetDateTime,
    ) -> MetadataResult<ClaimOutcome>;

    /// Create the finalized record, charge the reservation and mark the claim
    /// completed, in one transaction.
    async fn complete_finalize(
        &self,
        upload_id: &str,
        file: &FileRow,
        charge: u64,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Drop an unfinished claim so the client can retry.
    async fn release_finalize(&self, upload_id: &str) -> MetadataResult<()>;

    async fn get_finalize_claim(&self, upload_id: &str)
    -> MetadataResult<Option<FinalizeClaimRow>>;

    /// Delete claims completed, or last claimed, before `before`. Returns
    /// how many were removed. A purged session finalizes from scratch.
    async fn purge_finalize_claims(&self, before: OffsetDateTime) -> MetadataResult<u64>;
}
