//! File and folder tree operations.
//!
//! Every mutation here invalidates the owner's cached listing before it
//! returns. New content is admitted through a ledger reservation that the
//! metadata transaction commits together with the records.
//!
//! Content ids are shared by identical bytes, so writers and removers of the
//! same id serialize on a per-id lock: a writer holds it from the moment its
//! bytes are known to be stored until its records are committed, and a
//! remover holds it while it checks references and deletes.

use crate::archive::{ArchiveEntry, ArchiveExpander};
use crate::cache::ListingCache;
use crate::error::{ApiError, ApiResult};
use crate::ledger::{QuotaLedger, Reservation};
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::metrics::{
    ARCHIVE_ENTRIES_EXTRACTED, BYTES_FREED, FILES_CREATED, FILES_DELETED, LISTING_CACHE_HITS,
    LISTING_CACHE_MISSES,
};
use bytes::Bytes;
use pinbox_core::file::{FOLDER_MIME_TYPE, ROOT_PATH, join_path};
use pinbox_core::{ContentHash, ContentId, FileEntry, Identity, mime_from_name, parse_size};
use pinbox_metadata::MetadataStore;
use pinbox_metadata::models::{FilePatch, FileRow};
use pinbox_storage::{ByteStream, ContentStore, StorageResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;

/// A direct upload.
#[derive(Debug)]
pub struct NewUpload {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub parent_cid: Option<String>,
    /// Expand archives when the configured expander accepts the file.
    pub expand: bool,
    pub data: Bytes,
}

/// Content stored elsewhere, registered by identifier.
#[derive(Debug)]
pub struct ExternalFile {
    pub file_name: String,
    pub cid: String,
    /// Decimal byte count.
    pub size: String,
    pub mime_type: Option<String>,
    pub parent_cid: Option<String>,
}

/// Result of a direct upload.
#[derive(Debug, Clone)]
pub struct Uploaded {
    /// The stored file, or the folder an archive was expanded into.
    pub entry: FileEntry,
    /// Files extracted from an archive; zero for plain uploads.
    pub extracted: usize,
}

/// Result of a cascading delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub removed: usize,
    pub freed_bytes: u64,
}

/// Folder a new record is placed in.
#[derive(Debug, Clone)]
pub(crate) struct ParentRef {
    id: Uuid,
    /// Path children of this folder carry.
    path: String,
}

impl ParentRef {
    fn of(folder: &FileRow) -> Self {
        Self {
            id: folder.file_id,
            path: join_path(&folder.folder_path, &folder.name),
        }
    }
}

/// New file record at the root or under `parent`.
pub(crate) fn file_record(
    owner: &Identity,
    cid: &ContentId,
    name: &str,
    size: u64,
    mime_type: &str,
    parent: Option<&ParentRef>,
) -> FileRow {
    let now = OffsetDateTime::now_utc();
    FileRow {
        file_id: Uuid::new_v4(),
        cid: cid.to_string(),
        name: name.to_string(),
        size: size.to_string(),
        mime_type: mime_type.to_string(),
        owner: owner.as_str().to_string(),
        is_folder: false,
        parent_id: parent.map(|p| p.id),
        folder_path: parent.map_or_else(|| ROOT_PATH.to_string(), |p| p.path.clone()),
        created_at: now,
        updated_at: now,
    }
}

fn folder_record(owner: &Identity, name: &str, parent: Option<&ParentRef>) -> FileRow {
    let mut row = file_record(
        owner,
        &ContentId::new_folder(),
        name,
        0,
        FOLDER_MIME_TYPE,
        parent,
    );
    row.is_folder = true;
    row
}

/// Trimmed display name, or `BadRequest`.
pub(crate) fn validate_name(raw: &str) -> ApiResult<String> {
    let name = raw.trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "name must be 1..={MAX_NAME_LEN} bytes"
        )));
    }
    if name == "." || name == ".." || name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(ApiError::BadRequest(format!("invalid name: {name:?}")));
    }
    Ok(name.to_string())
}

fn resolve_mime(declared: Option<&str>, file_name: &str) -> String {
    match declared.map(str::trim) {
        Some(mime) if !mime.is_empty() => mime.to_string(),
        _ => mime_from_name(file_name).to_string(),
    }
}

/// Remove stored content that no record references.
///
/// Used after deletes and to undo content writes whose metadata transaction
/// failed. Content a record still points at is kept. Callers must not hold
/// the content lock of any id in `cids`.
pub(crate) async fn discard_unreferenced(
    metadata: &dyn MetadataStore,
    content: &dyn ContentStore,
    content_locks: &KeyedLocks,
    cids: &[ContentId],
) {
    for cid in cids {
        if cid.is_folder() {
            continue;
        }
        let _guard = content_locks.lock(cid.as_str()).await;
        match metadata.get_file_by_cid(cid.as_str()).await {
            Ok(None) => {
                if let Err(e) = content.remove(cid).await {
                    tracing::warn!(%cid, error = %e, "failed to remove unreferenced content");
                }
            }
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::warn!(%cid, error = %e, "could not check content references, keeping it");
            }
        }
    }
}

/// Store `data` again if its content was removed after it was first stored.
/// Call with the content lock of `cid` held.
async fn restore_missing(content: &dyn ContentStore, cid: &ContentId, data: &Bytes) -> StorageResult<()> {
    if content.exists(cid).await? {
        return Ok(());
    }
    tracing::debug!(%cid, "content removed concurrently, storing again");
    content.put_bytes(data.clone()).await.map(|_| ())
}

/// The metadata tree plus the content and quota bookkeeping around it.
pub struct FileTree {
    metadata: Arc<dyn MetadataStore>,
    content: Arc<dyn ContentStore>,
    ledger: Arc<QuotaLedger>,
    cache: Arc<ListingCache>,
    archive: Arc<dyn ArchiveExpander>,
    content_locks: Arc<KeyedLocks>,
}

impl FileTree {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        content: Arc<dyn ContentStore>,
        ledger: Arc<QuotaLedger>,
        cache: Arc<ListingCache>,
        archive: Arc<dyn ArchiveExpander>,
        content_locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            metadata,
            content,
            ledger,
            cache,
            archive,
            content_locks,
        }
    }

    /// Every record the identity owns, newest first.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn list(&self, identity: &Identity) -> ApiResult<Arc<Vec<FileEntry>>> {
        if let Some(files) = self.cache.get(identity.as_str()) {
            LISTING_CACHE_HITS.inc();
            return Ok(files);
        }
        LISTING_CACHE_MISSES.inc();

        let generation = self.cache.generation(identity.as_str());
        let rows = self.metadata.list_files(identity.as_str()).await?;
        let files = Arc::new(rows.iter().map(FileRow::to_entry).collect::<Vec<_>>());
        self.cache.put(identity.as_str(), generation, files.clone());
        Ok(files)
    }

    async fn resolve_parent(
        &self,
        identity: &Identity,
        parent_cid: Option<&str>,
    ) -> ApiResult<Option<ParentRef>> {
        let Some(cid) = parent_cid.map(str::trim).filter(|cid| !cid.is_empty()) else {
            return Ok(None);
        };
        let folder = self
            .metadata
            .get_file_by_cid(cid)
            .await?
            .filter(|row| row.owner == identity.as_str())
            .ok_or_else(|| ApiError::NotFound(format!("folder {cid}")))?;
        if !folder.is_folder {
            return Err(ApiError::BadRequest(format!("{cid} is not a folder")));
        }
        Ok(Some(ParentRef::of(&folder)))
    }

    /// Store uploaded bytes as one file, or expand an archive into a folder.
    #[tracing::instrument(skip(self, upload), fields(identity = %identity, file_name = %upload.file_name, size = upload.data.len()))]
    pub async fn upload(&self, identity: &Identity, upload: NewUpload) -> ApiResult<Uploaded> {
        let file_name = validate_name(&upload.file_name)?;
        let parent = self
            .resolve_parent(identity, upload.parent_cid.as_deref())
            .await?;

        if upload.expand
            && self
                .archive
                .can_expand(&file_name, upload.mime_type.as_deref())
        {
            return self
                .upload_archive(identity, &file_name, parent, upload.data)
                .await;
        }

        let mime_type = resolve_mime(upload.mime_type.as_deref(), &file_name);
        let size = upload.data.len() as u64;
        let reservation = self.ledger.reserve(identity, size).await?;

        let stored = match self.content.put_bytes(upload.data.clone()).await {
            Ok(stored) => stored,
            Err(e) => {
                reservation.release().await;
                return Err(ApiError::upstream(e));
            }
        };
        let guards = self.content_locks.lock_all([stored.cid.as_str()]).await;
        if let Err(e) = restore_missing(self.content.as_ref(), &stored.cid, &upload.data).await {
            drop(guards);
            reservation.release().await;
            return Err(ApiError::upstream(e));
        }

        let row = file_record(
            identity,
            &stored.cid,
            &file_name,
            stored.size,
            &mime_type,
            parent.as_ref(),
        );
        self.commit(
            identity,
            vec![row.clone()],
            vec![stored.cid],
            guards,
            reservation,
        )
        .await?;

        tracing::info!(cid = %row.cid, size = stored.size, "file stored");
        Ok(Uploaded {
            entry: row.to_entry(),
            extracted: 0,
        })
    }

    async fn upload_archive(
        &self,
        identity: &Identity,
        file_name: &str,
        parent: Option<ParentRef>,
        data: Bytes,
    ) -> ApiResult<Uploaded> {
        let max_total = self.ledger.policy().free_tier_bytes;
        let entries = dedup_entries(self.archive.expand(data, max_total).await?);
        if entries.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "archive {file_name} contains no files"
            )));
        }

        let folder_name = strip_archive_extension(file_name);
        let total: u64 = entries.iter().map(|e| e.data.len() as u64).sum();
        let reservation = self.ledger.reserve(identity, total).await?;

        let root = folder_record(identity, &folder_name, parent.as_ref());
        let mut rows = vec![root.clone()];
        let root_ref = ParentRef::of(&root);
        let mut folders: HashMap<Vec<String>, ParentRef> = HashMap::new();
        let mut stored_cids = Vec::with_capacity(entries.len());

        for entry in &entries {
            let mut prefix = Vec::new();
            let mut parent = root_ref.clone();
            for dir in entry.dirs() {
                prefix.push(dir.clone());
                parent = match folders.get(&prefix) {
                    Some(existing) => existing.clone(),
                    None => {
                        let folder = folder_record(identity, dir, Some(&parent));
                        let folder_ref = ParentRef::of(&folder);
                        folders.insert(prefix.clone(), folder_ref.clone());
                        rows.push(folder);
                        folder_ref
                    }
                };
            }

            let stored = match self.content.put_bytes(entry.data.clone()).await {
                Ok(stored) => stored,
                Err(e) => {
                    discard_unreferenced(
                        self.metadata.as_ref(),
                        self.content.as_ref(),
                        &self.content_locks,
                        &stored_cids,
                    )
                    .await;
                    reservation.release().await;
                    return Err(ApiError::upstream(e));
                }
            };
            let name = entry.file_name();
            rows.push(file_record(
                identity,
                &stored.cid,
                name,
                stored.size,
                mime_from_name(name),
                Some(&parent),
            ));
            stored_cids.push(stored.cid);
        }

        let guards = self
            .content_locks
            .lock_all(stored_cids.iter().map(ContentId::as_str))
            .await;
        for (entry, cid) in entries.iter().zip(&stored_cids) {
            if let Err(e) = restore_missing(self.content.as_ref(), cid, &entry.data).await {
                drop(guards);
                discard_unreferenced(
                    self.metadata.as_ref(),
                    self.content.as_ref(),
                    &self.content_locks,
                    &stored_cids,
                )
                .await;
                reservation.release().await;
                return Err(ApiError::upstream(e));
            }
        }

        let extracted = entries.len();
        self.commit(identity, rows, stored_cids, guards, reservation)
            .await?;

        ARCHIVE_ENTRIES_EXTRACTED.inc_by(extracted as u64);
        tracing::info!(cid = %root.cid, extracted, bytes = total, "archive expanded");
        Ok(Uploaded {
            entry: root.to_entry(),
            extracted,
        })
    }

    /// Insert records and charge the reservation in one transaction, or undo
    /// the content writes and release the reservation. `guards` are the
    /// content locks of `stored` and are released either way.
    async fn commit(
        &self,
        identity: &Identity,
        rows: Vec<FileRow>,
        stored: Vec<ContentId>,
        guards: Vec<KeyedGuard>,
        reservation: Reservation,
    ) -> ApiResult<()> {
        let charge = reservation.bytes();
        let created = self
            .metadata
            .create_files_charged(&rows, identity.as_str(), charge, OffsetDateTime::now_utc())
            .await;
        drop(guards);
        if let Err(e) = created {
            discard_unreferenced(
                self.metadata.as_ref(),
                self.content.as_ref(),
                &self.content_locks,
                &stored,
            )
            .await;
            reservation.release().await;
            return Err(e.into());
        }
        reservation.settle();
        self.cache.invalidate(identity.as_str());
        FILES_CREATED.inc_by(rows.len() as u64);
        Ok(())
    }

    /// Record content that already lives in the content store.
    #[tracing::instrument(skip(self, file), fields(identity = %identity, cid = %file.cid))]
    pub async fn register(&self, identity: &Identity, file: ExternalFile) -> ApiResult<FileEntry> {
        let file_name = validate_name(&file.file_name)?;
        let cid = ContentId::parse(&file.cid)?;
        if cid.is_folder() {
            return Err(ApiError::BadRequest(format!(
                "{cid} is reserved for folders"
            )));
        }
        let size = parse_size(&file.size)?;
        let parent = self
            .resolve_parent(identity, file.parent_cid.as_deref())
            .await?;
        let mime_type = resolve_mime(file.mime_type.as_deref(), &file_name);

        let reservation = self.ledger.reserve(identity, size).await?;
        let row = file_record(identity, &cid, &file_name, size, &mime_type, parent.as_ref());
        // Nothing was written to the content store, so nothing to undo there.
        // The id is still locked so a concurrent delete sees the new record.
        let guards = self.content_locks.lock_all([cid.as_str()]).await;
        self.commit(identity, vec![row.clone()], Vec::new(), guards, reservation)
            .await?;
        Ok(row.to_entry())
    }

    /// Create an empty folder.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn create_folder(
        &self,
        identity: &Identity,
        name: &str,
        parent_cid: Option<&str>,
    ) -> ApiResult<FileEntry> {
        let name = validate_name(name)?;
        let parent = self.resolve_parent(identity, parent_cid).await?;
        let row = folder_record(identity, &name, parent.as_ref());
        self.metadata.create_file(&row).await?;
        self.cache.invalidate(identity.as_str());
        FILES_CREATED.inc();
        Ok(row.to_entry())
    }

    /// Delete a record and, for folders, everything below it.
    #[tracing::instrument(skip(self), fields(identity = %identity, cid = %cid))]
    pub async fn delete(&self, identity: &Identity, cid: &str) -> ApiResult<DeleteOutcome> {
        let deleted = self
            .metadata
            .delete_tree(cid.trim(), identity.as_str(), OffsetDateTime::now_utc())
            .await?;
        self.cache.invalidate(identity.as_str());

        let removed: Vec<ContentId> = deleted
            .removed_cids
            .iter()
            .filter_map(|cid| ContentId::parse(cid).ok())
            .collect();
        discard_unreferenced(
            self.metadata.as_ref(),
            self.content.as_ref(),
            &self.content_locks,
            &removed,
        )
        .await;

        FILES_DELETED.inc_by(deleted.removed_cids.len() as u64);
        BYTES_FREED.inc_by(deleted.freed_bytes);
        tracing::info!(
            removed = deleted.removed_cids.len(),
            freed_bytes = deleted.freed_bytes,
            used_after = deleted.used_after,
            "records deleted"
        );
        Ok(DeleteOutcome {
            removed: deleted.removed_cids.len(),
            freed_bytes: deleted.freed_bytes,
        })
    }

    /// Rename and/or change the MIME type of a record.
    #[tracing::instrument(skip(self, name, mime_type), fields(identity = %identity, cid = %cid))]
    pub async fn update(
        &self,
        identity: &Identity,
        cid: &str,
        name: Option<&str>,
        mime_type: Option<&str>,
    ) -> ApiResult<FileEntry> {
        let patch = FilePatch {
            name: name.map(validate_name).transpose()?,
            mime_type: mime_type
                .map(str::trim)
                .filter(|mime| !mime.is_empty())
                .map(str::to_string),
        };
        if patch.is_empty() {
            return Err(ApiError::BadRequest(
                "nothing to update: provide name or mimeType".to_string(),
            ));
        }

        let row = self
            .metadata
            .update_file_meta(
                cid.trim(),
                identity.as_str(),
                &patch,
                OffsetDateTime::now_utc(),
            )
            .await?;
        self.cache.invalidate(identity.as_str());
        Ok(row.to_entry())
    }

    /// Stream a stored file back to its owner.
    #[tracing::instrument(skip(self), fields(identity = %identity, cid = %cid))]
    pub async fn open(&self, identity: &Identity, cid: &str) -> ApiResult<(FileRow, ByteStream)> {
        let row = self
            .metadata
            .get_file_by_cid(cid.trim())
            .await?
            .filter(|row| row.owner == identity.as_str())
            .ok_or_else(|| ApiError::NotFound(cid.to_string()))?;
        if row.is_folder {
            return Err(ApiError::BadRequest(format!("{cid} is a folder")));
        }
        let content_id = ContentId::parse(&row.cid)?;
        let stream = self
            .content
            .get_stream(&content_id)
            .await
            .map_err(ApiError::upstream)?;
        Ok((row, stream))
    }
}

/// Keep the first of several byte-identical entries; records are keyed by
/// content id, so identical bytes can only be recorded once.
fn dedup_entries(entries: Vec<ArchiveEntry>) -> Vec<ArchiveEntry> {
    let mut seen = HashSet::new();
    let before = entries.len();
    let kept: Vec<_> = entries
        .into_iter()
        .filter(|entry| seen.insert(ContentHash::compute(&entry.data)))
        .collect();
    if kept.len() < before {
        tracing::debug!(skipped = before - kept.len(), "duplicate archive entries skipped");
    }
    kept
}

fn strip_archive_extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("zip") && !stem.is_empty() => {
            stem.to_string()
        }
        _ => file_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::expander_from_config;
    use pinbox_core::QuotaPolicy;
    use pinbox_core::config::{ArchiveConfig, CacheConfig};
    use pinbox_core::file::DEFAULT_MIME_TYPE;
    use pinbox_metadata::SqliteStore;
    use pinbox_storage::{FilesystemBackend, LocalContentStore};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        tree: Arc<FileTree>,
        metadata: Arc<dyn MetadataStore>,
        content: Arc<dyn ContentStore>,
        content_locks: Arc<KeyedLocks>,
    }

    async fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let content: Arc<dyn ContentStore> = Arc::new(
            LocalContentStore::new(Arc::new(
                FilesystemBackend::new(temp.path().join("content")).await.unwrap(),
            ))
            .await
            .unwrap(),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"), Duration::from_secs(5))
                .await
                .unwrap(),
        );
        let cache = Arc::new(ListingCache::new(&CacheConfig::default()));
        let policy = QuotaPolicy {
            free_tier_bytes: 1024 * 1024,
            plan_bytes: 4 * 1024 * 1024,
        };
        let ledger = Arc::new(QuotaLedger::new(metadata.clone(), policy, cache.clone()));
        let content_locks = Arc::new(KeyedLocks::new());
        let tree = Arc::new(FileTree::new(
            metadata.clone(),
            content.clone(),
            ledger,
            cache,
            expander_from_config(&ArchiveConfig::default()),
            content_locks.clone(),
        ));
        Fixture {
            _temp: temp,
            tree,
            metadata,
            content,
            content_locks,
        }
    }

    fn plain(name: &str, data: &'static [u8]) -> NewUpload {
        NewUpload {
            file_name: name.to_string(),
            mime_type: None,
            parent_cid: None,
            expand: false,
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn test_delete_keeps_content_recorded_by_an_in_flight_writer() {
        let fx = fixture().await;
        let alice = Identity::parse("0xa11ce").unwrap();
        let bob = Identity::parse("0xb0b").unwrap();

        let first = fx.tree.upload(&alice, plain("shared.txt", b"shared")).await.unwrap();
        let cid = ContentId::parse(&first.entry.cid).unwrap();

        // A writer of the same bytes has stored them and holds their lock.
        let writer = fx.content_locks.lock(cid.as_str()).await;
        let delete = {
            let tree = fx.tree.clone();
            let alice = alice.clone();
            let cid = cid.to_string();
            tokio::spawn(async move { tree.delete(&alice, &cid).await })
        };
        for _ in 0..100 {
            if fx.metadata.get_file_by_cid(cid.as_str()).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!delete.is_finished());
        assert!(fx.content.exists(&cid).await.unwrap());

        // The writer commits its record before letting go.
        let row = file_record(&bob, &cid, "mine.txt", 6, "text/plain", None);
        fx.metadata
            .create_files_charged(std::slice::from_ref(&row), bob.as_str(), 0, OffsetDateTime::now_utc())
            .await
            .unwrap();
        drop(writer);

        let outcome = delete.await.unwrap().unwrap();
        assert_eq!(outcome.removed, 1);
        assert!(fx.content.exists(&cid).await.unwrap());
        let (row, _) = fx.tree.open(&bob, cid.as_str()).await.unwrap();
        assert_eq!(row.name, "mine.txt");
        assert!(fx.content_locks.is_empty());
    }

    #[tokio::test]
    async fn test_upload_restores_content_removed_before_commit() {
        let fx = fixture().await;
        let bob = Identity::parse("0xb0b").unwrap();
        let cid = ContentId::from_hash(&ContentHash::compute(b"racy bytes"));

        // A remover holds the id while the upload stores its bytes.
        let remover = fx.content_locks.lock(cid.as_str()).await;
        let upload = {
            let tree = fx.tree.clone();
            let bob = bob.clone();
            tokio::spawn(async move { tree.upload(&bob, plain("racy.txt", b"racy bytes")).await })
        };
        for _ in 0..100 {
            if fx.content.exists(&cid).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fx.content.remove(&cid).await.unwrap();
        drop(remover);

        let uploaded = upload.await.unwrap().unwrap();
        assert_eq!(uploaded.entry.cid, cid.as_str());
        assert!(fx.content.exists(&cid).await.unwrap());
        assert!(fx.tree.open(&bob, cid.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_waits_for_content_lock() {
        let fx = fixture().await;
        let bob = Identity::parse("0xb0b").unwrap();
        let cid = ContentId::from_hash(&ContentHash::compute(b"elsewhere"));

        let remover = fx.content_locks.lock(cid.as_str()).await;
        let register = {
            let tree = fx.tree.clone();
            let bob = bob.clone();
            let cid = cid.to_string();
            tokio::spawn(async move {
                tree.register(
                    &bob,
                    ExternalFile {
                        file_name: "elsewhere.bin".to_string(),
                        cid,
                        size: "9".to_string(),
                        mime_type: None,
                        parent_cid: None,
                    },
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!register.is_finished());
        assert!(fx.metadata.get_file_by_cid(cid.as_str()).await.unwrap().is_none());

        drop(remover);
        let entry = register.await.unwrap().unwrap();
        assert_eq!(entry.cid, cid.as_str());
        assert!(fx.content_locks.is_empty());
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  report.pdf ").unwrap(), "report.pdf");
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\nb").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_resolve_mime() {
        assert_eq!(resolve_mime(Some("video/mp4"), "a.bin"), "video/mp4");
        assert_eq!(resolve_mime(Some("  "), "a.png"), "image/png");
        assert_eq!(resolve_mime(None, "a"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_strip_archive_extension() {
        assert_eq!(strip_archive_extension("photos.zip"), "photos");
        assert_eq!(strip_archive_extension("photos.ZIP"), "photos");
        assert_eq!(strip_archive_extension(".zip"), ".zip");
        assert_eq!(strip_archive_extension("bundle"), "bundle");
    }

    #[test]
    fn test_dedup_entries() {
        let entry = |name: &str, data: &'static [u8]| ArchiveEntry {
            path: vec![name.to_string()],
            data: Bytes::from_static(data),
        };
        let kept = dedup_entries(vec![
            entry("a", b"same"),
            entry("b", b"other"),
            entry("c", b"same"),
        ]);
        let names: Vec<_> = kept.iter().map(|e| e.file_name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_records_nest_under_parent() {
        let owner = Identity::parse("0xabc").unwrap();
        let folder = folder_record(&owner, "docs", None);
        assert!(folder.is_folder);
        assert_eq!(folder.folder_path, "/");
        assert_eq!(folder.size, "0");

        let parent = ParentRef::of(&folder);
        let cid = ContentId::from_hash(&ContentHash::compute(b"x"));
        let file = file_record(&owner, &cid, "a.txt", 1, "text/plain", Some(&parent));
        assert_eq!(file.parent_id, Some(folder.file_id));
        assert_eq!(file.folder_path, "/docs");
        assert_eq!(file.owner, "0xabc");
    }
}
