//! Quota account repository.

use crate::error::MetadataResult;
use crate::models::{AccountRow, PurchaseRow, UsageRecount};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for per-identity quota counters.
///
/// Every counter mutation is a single atomic statement.
#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Get the account, creating a zeroed one if absent.
    async fn ensure_account(&self, identity: &str, now: OffsetDateTime)
    -> MetadataResult<AccountRow>;

    async fn get_account(&self, identity: &str) -> MetadataResult<Option<AccountRow>>;

    /// Add `delta` to used bytes (upserting the account), clamped at zero.
    /// Returns the new used value.
    async fn apply_delta(&self, identity: &str, delta: i64, now: OffsetDateTime)
    -> MetadataResult<u64>;

    /// Recompute used bytes from the identity's records, overwrite the
    /// counter and stamp `last_checked_at`, in one transaction.
    async fn recompute_used(&self, identity: &str, now: OffsetDateTime)
    -> MetadataResult<UsageRecount>;

    /// Reserve `bytes` if `used + reserved + bytes <= free_tier + purchased`.
    ///
    /// Returns false when the reservation would exceed capacity.
    async fn reserve(
        &self,
        identity: &str,
        bytes: u64,
        free_tier_bytes: u64,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Drop a reservation without charging it.
    async fn release(&self, identity: &str, bytes: u64, now: OffsetDateTime)
    -> MetadataResult<()>;

    /// Credit a purchase once per transaction hash.
    ///
    /// Returns false if the hash was already credited.
    async fn record_purchase(&self, purchase: &PurchaseRow) -> MetadataResult<bool>;
}
