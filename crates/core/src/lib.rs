//! Core domain types and shared logic for Pinbox.
//!
//! This crate defines the data model used across all other crates:
//! - Wallet identities and their normalization
//! - Upload sessions and the staging key layout
//! - Content identifiers, sizes and listing entries
//! - Quota policy and capacity rules
//! - Configuration

pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod identity;
pub mod quota;
pub mod upload;

pub use error::{Error, Result};
pub use file::{ContentId, FileEntry, format_size, mime_from_name, parse_size};
pub use hash::{ContentHash, ContentHasher};
pub use identity::Identity;
pub use quota::{CapacityCheck, CapacityError, QuotaPolicy, QuotaSnapshot, check_capacity};
pub use upload::{UploadId, validate_chunk_position};

/// Maximum chunk size: 4 MiB
pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default free tier: 1 GiB
pub const DEFAULT_FREE_TIER_BYTES: u64 = 1024 * 1024 * 1024;
