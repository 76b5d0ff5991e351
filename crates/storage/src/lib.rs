//! Object storage abstraction and backends for Pinbox.
//!
//! This crate provides:
//! - A key/value object store trait with an atomic-write filesystem backend
//! - The staging area holding upload chunks and reassembled artifacts
//! - The content store capability and its local content-addressed implementation

pub mod backends;
pub mod content;
pub mod error;
pub mod staging;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use content::{ContentStore, LocalContentStore, StoredContent};
pub use error::{StorageError, StorageResult};
pub use staging::StagingArea;
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use pinbox_core::config::{ContentConfig, StagingConfig};
use std::sync::Arc;

/// Create the staging area from configuration.
pub async fn staging_from_config(config: &StagingConfig) -> StorageResult<StagingArea> {
    let backend = FilesystemBackend::new(&config.path).await?;
    Ok(StagingArea::new(Arc::new(backend)))
}

/// Create the content store from configuration.
pub async fn content_from_config(config: &ContentConfig) -> StorageResult<Arc<dyn ContentStore>> {
    match config {
        ContentConfig::Local { path } => {
            let backend = FilesystemBackend::new(path).await?;
            let store = LocalContentStore::new(Arc::new(backend)).await?;
            Ok(Arc::new(store))
        }
    }
}
