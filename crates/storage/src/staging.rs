//! Staging area for chunked uploads.
//!
//! Every session owns the prefix `uploads/<id>/`: one object per chunk, a
//! manifest holding the chunk count the first chunk declared, and the
//! reassembled artifact. Nothing outside that prefix is touched.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore};
use bytes::Bytes;
use futures::StreamExt;
use pinbox_core::UploadId;
use pinbox_core::upload::STAGING_PREFIX;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// Chunk staging and reassembly over an object store.
#[derive(Clone)]
pub struct StagingArea {
    store: Arc<dyn ObjectStore>,
}

impl StagingArea {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Durably store chunk `index` of a session declared with `total`
    /// chunks. Re-writing an index replaces it; a `total` that disagrees with
    /// the session's manifest is rejected.
    #[instrument(skip(self, data), fields(upload_id = %upload_id, size = data.len()))]
    pub async fn write_chunk(
        &self,
        upload_id: &UploadId,
        index: u32,
        total: u32,
        data: Bytes,
    ) -> StorageResult<()> {
        match self.declared_total(upload_id).await? {
            Some(declared) if declared != total => {
                return Err(StorageError::SessionMismatch(format!(
                    "upload {upload_id} was started with {declared} chunks, got totalChunks {total}"
                )));
            }
            Some(_) => {}
            None => {
                self.store
                    .put(&upload_id.manifest_key(), Bytes::from(total.to_string()))
                    .await?
            }
        }
        self.store.put(&upload_id.chunk_key(index), data).await
    }

    /// Chunk count recorded by the session's first chunk.
    pub async fn declared_total(&self, upload_id: &UploadId) -> StorageResult<Option<u32>> {
        let raw = match self.store.get(&upload_id.manifest_key()).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| {
                StorageError::SessionMismatch(format!("upload {upload_id} has an unreadable manifest"))
            })
    }

    /// Check that the staged session matches a finalize for `total` chunks:
    /// the manifest agrees and no chunk lies at or beyond `total`.
    #[instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn verify_session(&self, upload_id: &UploadId, total: u32) -> StorageResult<()> {
        if let Some(declared) = self.declared_total(upload_id).await?
            && declared != total
        {
            return Err(StorageError::SessionMismatch(format!(
                "upload {upload_id} was started with {declared} chunks, finalize asked for {total}"
            )));
        }
        let beyond = self
            .store
            .list(&upload_id.staging_prefix())
            .await?
            .iter()
            .filter_map(|key| upload_id.chunk_index(key))
            .find(|&index| index >= total);
        if let Some(index) = beyond {
            return Err(StorageError::SessionMismatch(format!(
                "upload {upload_id} has chunk {index} beyond totalChunks {total}"
            )));
        }
        Ok(())
    }

    /// First index in `[0, total)` with no staged chunk.
    pub async fn first_missing_chunk(
        &self,
        upload_id: &UploadId,
        total: u32,
    ) -> StorageResult<Option<u32>> {
        for index in 0..total {
            if !self.store.exists(&upload_id.chunk_key(index)).await? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Concatenate chunks `0..total` in index order into the assembled artifact.
    ///
    /// The artifact only becomes visible once every chunk has been copied.
    #[instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn assemble(&self, upload_id: &UploadId, total: u32) -> StorageResult<u64> {
        let mut upload = self.store.put_stream(&upload_id.assembled_key()).await?;

        let copied: StorageResult<()> = async {
            for index in 0..total {
                let mut chunk = match self.store.get_stream(&upload_id.chunk_key(index)).await {
                    Ok(stream) => stream,
                    Err(StorageError::NotFound(_)) => {
                        return Err(StorageError::MissingChunk {
                            upload_id: upload_id.to_string(),
                            index,
                        });
                    }
                    Err(e) => return Err(e),
                };
                while let Some(bytes) = chunk.next().await {
                    upload.write(bytes?).await?;
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = copied {
            if let Err(abort_err) = upload.abort().await {
                tracing::warn!(error = %abort_err, "failed to abort assembly");
            }
            return Err(e);
        }

        let size = upload.finish().await?;
        tracing::debug!(size, chunks = total, "upload assembled");
        Ok(size)
    }

    /// Stream the assembled artifact.
    pub async fn open_assembled(&self, upload_id: &UploadId) -> StorageResult<ByteStream> {
        self.store.get_stream(&upload_id.assembled_key()).await
    }

    /// Sessions whose newest staged object was written before `cutoff`.
    ///
    /// Objects without a modification time keep their session alive.
    #[instrument(skip(self))]
    pub async fn stale_sessions(&self, cutoff: OffsetDateTime) -> StorageResult<Vec<UploadId>> {
        let mut newest: BTreeMap<String, (UploadId, Option<OffsetDateTime>)> = BTreeMap::new();
        for key in self.store.list(&format!("{STAGING_PREFIX}/")).await? {
            let Some(upload_id) = UploadId::from_staging_key(&key) else {
                continue;
            };
            let modified = match self.store.head(&key).await {
                Ok(meta) => meta.last_modified,
                // Removed since the listing.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let Some(modified) = modified else {
                newest.insert(upload_id.to_string(), (upload_id, None));
                continue;
            };
            newest
                .entry(upload_id.to_string())
                .and_modify(|(_, seen)| {
                    if let Some(seen) = seen {
                        *seen = (*seen).max(modified);
                    }
                })
                .or_insert((upload_id, Some(modified)));
        }

        Ok(newest
            .into_values()
            .filter_map(|(upload_id, modified)| {
                modified.filter(|m| *m < cutoff).map(|_| upload_id)
            })
            .collect())
    }

    /// Remove every staged object of a session.
    #[instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn cleanup(&self, upload_id: &UploadId) -> StorageResult<usize> {
        self.store.delete_prefix(&upload_id.staging_prefix()).await
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }
}
