//! Metadata store abstraction and SQLite implementation for Pinbox.
//!
//! This crate provides the persistent data model:
//! - The file/folder tree with materialized paths
//! - Per-identity quota accounts, reservations and purchases
//! - Single-flight finalize claims for chunked uploads

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use pinbox_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    let store = SqliteStore::new(&config.path, config.busy_timeout()).await?;
    Ok(Arc::new(store) as Arc<dyn MetadataStore>)
}
