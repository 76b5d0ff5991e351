//! Database models mapping to the metadata schema.

use pinbox_core::{FileEntry, format_size, parse_size};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Files and folders
// =============================================================================

/// File or folder record.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub file_id: Uuid,
    pub cid: String,
    pub name: String,
    /// Decimal byte count.
    pub size: String,
    pub mime_type: String,
    /// Normalized owning identity.
    pub owner: String,
    pub is_folder: bool,
    pub parent_id: Option<Uuid>,
    /// Materialized path of the containing folder.
    pub folder_path: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileRow {
    /// Parsed byte size.
    pub fn size_bytes(&self) -> pinbox_core::Result<u64> {
        parse_size(&self.size)
    }

    /// Listing representation.
    pub fn to_entry(&self) -> FileEntry {
        let formatted_size = match self.size_bytes() {
            Ok(bytes) => format_size(bytes),
            Err(_) => self.size.clone(),
        };
        FileEntry {
            id: self.file_id.to_string(),
            cid: self.cid.clone(),
            name: self.name.clone(),
            size: self.size.clone(),
            formatted_size,
            mime_type: self.mime_type.clone(),
            wallet_address: self.owner.clone(),
            is_folder: self.is_folder,
            parent_folder: self.parent_id.map(|id| id.to_string()),
            folder_path: self.folder_path.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Result of a cascading delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedTree {
    /// Content ids of every removed record, root first.
    pub removed_cids: Vec<String>,
    pub freed_bytes: u64,
    /// Owner's used counter after the delta.
    pub used_after: u64,
}

/// Patch applied by a metadata update.
#[derive(Debug, Clone, Default)]
pub struct FilePatch {
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

impl FilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.mime_type.is_none()
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// Per-identity quota counters.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub identity: String,
    pub used_bytes: i64,
    pub purchased_bytes: i64,
    /// Bytes held by in-flight uploads.
    pub reserved_bytes: i64,
    pub last_checked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl AccountRow {
    pub fn snapshot(&self) -> pinbox_core::QuotaSnapshot {
        pinbox_core::QuotaSnapshot {
            used: self.used_bytes.max(0) as u64,
            purchased: self.purchased_bytes.max(0) as u64,
            reserved: self.reserved_bytes.max(0) as u64,
        }
    }
}

/// Outcome of recomputing an identity's used bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageRecount {
    /// Counter value before the recount.
    pub previous: u64,
    pub used: u64,
    /// Non-folder records owned.
    pub files: u64,
}

impl UsageRecount {
    pub fn corrected(&self) -> bool {
        self.previous != self.used
    }
}

/// Credited purchase, keyed by transaction hash.
#[derive(Debug, Clone, FromRow)]
pub struct PurchaseRow {
    pub transaction_hash: String,
    pub identity: String,
    pub bytes: i64,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Finalize claims
// =============================================================================

pub const CLAIM_STATE_CLAIMED: &str = "claimed";
pub const CLAIM_STATE_COMPLETED: &str = "completed";

/// Single-flight marker for finalizing an upload session.
#[derive(Debug, Clone, FromRow)]
pub struct FinalizeClaimRow {
    pub upload_id: String,
    pub owner: String,
    pub state: String,
    pub cid: Option<String>,
    pub name: Option<String>,
    pub size: Option<i64>,
    pub claimed_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl FinalizeClaimRow {
    pub fn is_completed(&self) -> bool {
        self.state == CLAIM_STATE_COMPLETED
    }
}

/// Outcome of trying to claim a session for finalize.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller owns the claim and must complete or release it.
    Claimed,
    /// Another finalize is running.
    InProgress,
    /// The session was finalized earlier.
    Completed(FinalizeClaimRow),
}
