//! Chunk ingestion into the staging area.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{BYTES_INGESTED, CHUNK_INGEST_DURATION, CHUNKS_INGESTED};
use bytes::Bytes;
use pinbox_core::upload::ChunkAck;
use pinbox_core::{UploadId, validate_chunk_position};
use pinbox_storage::StagingArea;
use std::time::Instant;

/// Writes client chunks to the staging area.
///
/// Chunks may arrive in any order and concurrently; sessions are created
/// implicitly by their first chunk.
#[derive(Clone)]
pub struct ChunkIngestor {
    staging: StagingArea,
    max_chunk_size: u64,
}

impl ChunkIngestor {
    pub fn new(staging: StagingArea, max_chunk_size: u64) -> Self {
        Self {
            staging,
            max_chunk_size,
        }
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size
    }

    /// Durably store chunk `index` of `total`. Re-sending an index replaces
    /// the earlier bytes.
    #[tracing::instrument(skip(self, data), fields(upload_id = %upload_id, size = data.len()))]
    pub async fn ingest(
        &self,
        upload_id: &UploadId,
        index: u32,
        total: u32,
        data: Bytes,
    ) -> ApiResult<ChunkAck> {
        let size = data.len() as u64;
        if size > self.max_chunk_size {
            return Err(ApiError::ChunkTooLarge {
                size,
                limit: self.max_chunk_size,
            });
        }
        validate_chunk_position(index, total).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let start = Instant::now();
        self.staging.write_chunk(upload_id, index, total, data).await?;

        CHUNKS_INGESTED.inc();
        BYTES_INGESTED.inc_by(size);
        CHUNK_INGEST_DURATION.observe(start.elapsed().as_secs_f64());
        Ok(ChunkAck::stored(upload_id, index, total))
    }
}
