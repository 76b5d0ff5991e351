//! Store doubles that fail on demand.

use async_trait::async_trait;
use pinbox_core::ContentId;
use pinbox_metadata::models::{
    AccountRow, ClaimOutcome, DeletedTree, FilePatch, FileRow, FinalizeClaimRow, PurchaseRow,
    UsageRecount,
};
use pinbox_metadata::repos::{AccountRepo, FileRepo, FinalizeRepo};
use pinbox_metadata::{MetadataError, MetadataResult, MetadataStore};
use pinbox_storage::{ByteStream, ContentStore, StorageError, StorageResult, StoredContent};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Metadata store whose database is unreachable.
pub struct UnavailableMetadata;

fn unavailable<T>() -> MetadataResult<T> {
    Err(MetadataError::Internal("database unavailable".to_string()))
}

#[async_trait]
impl FileRepo for UnavailableMetadata {
    async fn create_file(&self, _file: &FileRow) -> MetadataResult<()> {
        unavailable()
    }

    async fn create_files_charged(
        &self,
        _files: &[FileRow],
        _owner: &str,
        _charge: u64,
        _now: OffsetDateTime,
    ) -> MetadataResult<()> {
        unavailable()
    }

    async fn get_file_by_cid(&self, _cid: &str) -> MetadataResult<Option<FileRow>> {
        unavailable()
    }

    async fn list_files(&self, _owner: &str) -> MetadataResult<Vec<FileRow>> {
        unavailable()
    }

    async fn list_children(&self, _parent_id: Uuid) -> MetadataResult<Vec<FileRow>> {
        unavailable()
    }

    async fn delete_tree(
        &self,
        _cid: &str,
        _owner: &str,
        _now: OffsetDateTime,
    ) -> MetadataResult<DeletedTree> {
        unavailable()
    }

    async fn update_file_meta(
        &self,
        _cid: &str,
        _owner: &str,
        _patch: &FilePatch,
        _now: OffsetDateTime,
    ) -> MetadataResult<FileRow> {
        unavailable()
    }

    async fn owner_usage(&self, _owner: &str) -> MetadataResult<(u64, u64)> {
        unavailable()
    }
}

#[async_trait]
impl AccountRepo for UnavailableMetadata {
    async fn ensure_account(
        &self,
        _identity: &str,
        _now: OffsetDateTime,
    ) -> MetadataResult<AccountRow> {
        unavailable()
    }

    async fn get_account(&self, _identity: &str) -> MetadataResult<Option<AccountRow>> {
        unavailable()
    }

    async fn apply_delta(
        &self,
        _identity: &str,
        _delta: i64,
        _now: OffsetDateTime,
    ) -> MetadataResult<u64> {
        unavailable()
    }

    async fn recompute_used(
        &self,
        _identity: &str,
        _now: OffsetDateTime,
    ) -> MetadataResult<UsageRecount> {
        unavailable()
    }

    async fn reserve(
        &self,
        _identity: &str,
        _bytes: u64,
        _free_tier_bytes: u64,
        _now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        unavailable()
    }

    async fn release(&self, _identity: &str, _bytes: u64, _now: OffsetDateTime) -> MetadataResult<()> {
        unavailable()
    }

    async fn record_purchase(&self, _purchase: &PurchaseRow) -> MetadataResult<bool> {
        unavailable()
    }
}

#[async_trait]
impl FinalizeRepo for UnavailableMetadata {
    async fn claim_finalize(
        &self,
        _upload_id: &str,
        _owner: &str,
        _now: OffsetDateTime,
        _stale_before: OffsetDateTime,
    ) -> MetadataResult<ClaimOutcome> {
        unavailable()
    }

    async fn complete_finalize(
        &self,
        _upload_id: &str,
        _file: &FileRow,
        _charge: u64,
        _now: OffsetDateTime,
    ) -> MetadataResult<()> {
        unavailable()
    }

    async fn release_finalize(&self, _upload_id: &str) -> MetadataResult<()> {
        unavailable()
    }

    async fn get_finalize_claim(
        &self,
        _upload_id: &str,
    ) -> MetadataResult<Option<FinalizeClaimRow>> {
        unavailable()
    }

    async fn purge_finalize_claims(&self, _before: OffsetDateTime) -> MetadataResult<u64> {
        unavailable()
    }
}

#[async_trait]
impl MetadataStore for UnavailableMetadata {
    async fn migrate(&self) -> MetadataResult<()> {
        unavailable()
    }

    async fn health_check(&self) -> MetadataResult<()> {
        unavailable()
    }
}

/// Content store that reads through to `inner` but refuses every write.
pub struct FailingWriteContent {
    inner: Arc<dyn ContentStore>,
}

#[allow(dead_code)]
impl FailingWriteContent {
    pub fn wrap(inner: Arc<dyn ContentStore>) -> Arc<dyn ContentStore> {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl ContentStore for FailingWriteContent {
    async fn put_stream(&self, _data: ByteStream) -> StorageResult<StoredContent> {
        Err(StorageError::Upstream("disk quota exceeded".to_string()))
    }

    async fn get_stream(&self, cid: &ContentId) -> StorageResult<ByteStream> {
        self.inner.get_stream(cid).await
    }

    async fn exists(&self, cid: &ContentId) -> StorageResult<bool> {
        self.inner.exists(cid).await
    }

    async fn remove(&self, cid: &ContentId) -> StorageResult<()> {
        self.inner.remove(cid).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
