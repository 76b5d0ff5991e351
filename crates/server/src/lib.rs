//! HTTP API server for Pinbox.
//!
//! This crate provides the HTTP surface and the services behind it:
//! - Chunk ingestion and upload finalization
//! - Direct uploads with zip expansion
//! - Per-wallet file tree (folders, rename, cascade delete)
//! - Quota ledger and storage purchases
//! - Listing cache
//! - Background sweep of abandoned upload state

pub mod archive;
pub mod cache;
pub mod error;
pub mod finalize;
pub mod handlers;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod tree;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
