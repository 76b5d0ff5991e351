//! File and folder tree repository.

use crate::error::MetadataResult;
use crate::models::{DeletedTree, FilePatch, FileRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for the file/folder tree.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Insert an uncharged record (folders).
    ///
    /// Returns `AlreadyExists` if the content id is taken.
    async fn create_file(&self, file: &FileRow) -> MetadataResult<()>;

    /// Insert records and convert `charge` reserved bytes of `owner` into used
    /// bytes, all in one transaction.
    ///
    /// The caller must hold a reservation of at least `charge` bytes.
    async fn create_files_charged(
        &self,
        files: &[FileRow],
        owner: &str,
        charge: u64,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Get a record by content id.
    async fn get_file_by_cid(&self, cid: &str) -> MetadataResult<Option<FileRow>>;

    /// All records owned by an identity, newest first.
    async fn list_files(&self, owner: &str) -> MetadataResult<Vec<FileRow>>;

    /// Direct children of a folder.
    async fn list_children(&self, parent_id: Uuid) -> MetadataResult<Vec<FileRow>>;

    /// Delete a record and all its descendants, then subtract their combined
    /// size from the owner's used counter, in one transaction.
    ///
    /// Returns `NotFound` unless `cid` exists and belongs to `owner`.
    async fn delete_tree(
        &self,
        cid: &str,
        owner: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<DeletedTree>;

    /// Patch display name and/or MIME type. Renaming a folder rewrites the
    /// materialized paths of its descendants.
    ///
    /// Returns `NotFound` unless `cid` exists and belongs to `owner`.
    async fn update_file_meta(
        &self,
        cid: &str,
        owner: &str,
        patch: &FilePatch,
        now: OffsetDateTime,
    ) -> MetadataResult<FileRow>;

    /// Sum of record sizes and number of non-folder records for an owner.
    async fn owner_usage(&self, owner: &str) -> MetadataResult<(u64, u64)>;
}
