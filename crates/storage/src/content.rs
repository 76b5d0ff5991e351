//! Content store: accepts bytes, returns a content identifier and length.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use pinbox_core::{ContentHash, ContentId};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

const INCOMING_PREFIX: &str = "incoming";
const OBJECTS_PREFIX: &str = "objects";
const CID_HASH_PREFIX: &str = "sha256-";

/// Result of storing content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredContent {
    pub cid: ContentId,
    pub size: u64,
}

/// Opaque content store capability.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Store a stream of bytes. Errors from the input stream abort the write.
    async fn put_stream(&self, data: ByteStream) -> StorageResult<StoredContent>;

    /// Store an in-memory buffer.
    async fn put_bytes(&self, data: Bytes) -> StorageResult<StoredContent> {
        let stream = futures::stream::once(async move { Ok(data) });
        self.put_stream(Box::pin(stream)).await
    }

    /// Stream stored bytes back.
    async fn get_stream(&self, cid: &ContentId) -> StorageResult<ByteStream>;

    async fn exists(&self, cid: &ContentId) -> StorageResult<bool>;

    /// Drop stored bytes. Missing content is not an error.
    async fn remove(&self, cid: &ContentId) -> StorageResult<()>;

    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Content-addressed store over a local object store.
///
/// Identifiers are `sha256-<hex>` of the stored bytes, so identical uploads
/// map to one object.
pub struct LocalContentStore {
    objects: Arc<dyn ObjectStore>,
}

impl LocalContentStore {
    /// Create the store and discard writes interrupted by a previous shutdown.
    pub async fn new(objects: Arc<dyn ObjectStore>) -> StorageResult<Self> {
        let dropped = objects.delete_prefix(INCOMING_PREFIX).await?;
        if dropped > 0 {
            tracing::info!(dropped, "discarded interrupted content writes");
        }
        Ok(Self { objects })
    }

    fn object_key(cid: &ContentId) -> StorageResult<String> {
        let hex = cid
            .as_str()
            .strip_prefix(CID_HASH_PREFIX)
            .ok_or_else(|| StorageError::NotFound(cid.to_string()))?;
        let hash =
            ContentHash::from_hex(hex).map_err(|_| StorageError::NotFound(cid.to_string()))?;
        Ok(Self::hash_key(&hash))
    }

    fn hash_key(hash: &ContentHash) -> String {
        let hex = hash.to_hex();
        format!("{OBJECTS_PREFIX}/{}/{hex}", &hex[..2])
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    #[instrument(skip(self, data), fields(backend = "local"))]
    async fn put_stream(&self, mut data: ByteStream) -> StorageResult<StoredContent> {
        let incoming = format!("{INCOMING_PREFIX}/{}", Uuid::new_v4());
        let mut upload = self.objects.put_stream(&incoming).await?;
        let mut hasher = ContentHash::hasher();

        while let Some(next) = data.next().await {
            let written = match next {
                Ok(bytes) => {
                    hasher.update(&bytes);
                    upload.write(bytes).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(error = %abort_err, "failed to abort content write");
                }
                return Err(e);
            }
        }

        let size = upload.finish().await?;
        let hash = hasher.finalize();
        self.objects
            .rename(&incoming, &Self::hash_key(&hash))
            .await?;

        let cid = ContentId::from_hash(&hash);
        tracing::debug!(%cid, size, "content stored");
        Ok(StoredContent { cid, size })
    }

    async fn get_stream(&self, cid: &ContentId) -> StorageResult<ByteStream> {
        let key = Self::object_key(cid)?;
        self.objects.get_stream(&key).await.map_err(|e| match e {
            StorageError::NotFound(_) => StorageError::NotFound(cid.to_string()),
            other => other,
        })
    }

    async fn exists(&self, cid: &ContentId) -> StorageResult<bool> {
        match Self::object_key(cid) {
            Ok(key) => self.objects.exists(&key).await,
            Err(_) => Ok(false),
        }
    }

    #[instrument(skip(self), fields(backend = "local", cid = %cid))]
    async fn remove(&self, cid: &ContentId) -> StorageResult<()> {
        let Ok(key) = Self::object_key(cid) else {
            return Ok(());
        };
        match self.objects.delete(&key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.objects.health_check().await
    }
}
