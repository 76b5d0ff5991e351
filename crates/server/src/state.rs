//! Application state shared across handlers.

use crate::archive::expander_from_config;
use crate::cache::ListingCache;
use crate::error::ApiResult;
use crate::finalize::Finalizer;
use crate::ingest::ChunkIngestor;
use crate::ledger::QuotaLedger;
use crate::locks::KeyedLocks;
use crate::tree::FileTree;
use pinbox_core::config::AppConfig;
use pinbox_metadata::MetadataStore;
use pinbox_storage::{ContentStore, StagingArea};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Content store for finalized and directly uploaded bytes.
    pub content: Arc<dyn ContentStore>,
    /// Staging area for chunked uploads.
    pub staging: StagingArea,
    pub cache: Arc<ListingCache>,
    pub ledger: Arc<QuotaLedger>,
    pub tree: Arc<FileTree>,
    pub ingestor: ChunkIngestor,
    pub finalizer: Arc<Finalizer>,
}

impl AppState {
    /// Wire the services over already-opened stores.
    pub fn new(
        config: AppConfig,
        staging: StagingArea,
        content: Arc<dyn ContentStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let cache = Arc::new(ListingCache::new(&config.cache));
        let content_locks = Arc::new(KeyedLocks::new());
        let ledger = Arc::new(QuotaLedger::new(
            metadata.clone(),
            config.quota.policy(),
            cache.clone(),
        ));
        let tree = Arc::new(FileTree::new(
            metadata.clone(),
            content.clone(),
            ledger.clone(),
            cache.clone(),
            expander_from_config(&config.archive),
            content_locks.clone(),
        ));
        let ingestor = ChunkIngestor::new(staging.clone(), config.server.max_chunk_size);
        let finalizer = Arc::new(Finalizer::new(
            staging.clone(),
            content.clone(),
            metadata.clone(),
            ledger.clone(),
            cache.clone(),
            config.server.finalize_timeout(),
            content_locks,
        ));

        Self {
            config: Arc::new(config),
            metadata,
            content,
            staging,
            cache,
            ledger,
            tree,
            ingestor,
            finalizer,
        }
    }

    /// Check every backing store.
    pub async fn health_check(&self) -> ApiResult<()> {
        self.metadata.health_check().await?;
        self.staging.health_check().await?;
        self.content.health_check().await?;
        Ok(())
    }
}
