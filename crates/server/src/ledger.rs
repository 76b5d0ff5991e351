//! Storage quota ledger.
//!
//! Counters live in the metadata store and are only changed by single atomic
//! statements. New content is admitted through a [`Reservation`]: bytes are
//! reserved up front, then either committed together with the records that
//! consume them or released.

use crate::cache::ListingCache;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{PURCHASES_CREDITED, QUOTA_CORRECTIONS, QUOTA_RECOMPUTES};
use pinbox_core::{CapacityCheck, CapacityError, Identity, QuotaPolicy, check_capacity};
use pinbox_metadata::MetadataStore;
use pinbox_metadata::models::PurchaseRow;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

const MAX_TRANSACTION_HASH_LEN: usize = 128;

/// Quota summary returned by `/storage/info` and `/storage/purchase`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub total_storage_used: u64,
    pub total_storage_purchased: u64,
    pub total_available_storage: u64,
    pub remaining_storage: u64,
    pub files_count: u64,
    /// Set when the figures could not be read or recomputed.
    pub estimated: bool,
}

/// Per-identity quota operations.
pub struct QuotaLedger {
    metadata: Arc<dyn MetadataStore>,
    policy: QuotaPolicy,
    cache: Arc<ListingCache>,
}

impl QuotaLedger {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        policy: QuotaPolicy,
        cache: Arc<ListingCache>,
    ) -> Self {
        Self {
            metadata,
            policy,
            cache,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Check whether `requested` bytes would be admitted right now.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn check(&self, identity: &Identity, requested: u64) -> ApiResult<CapacityCheck> {
        let account = self
            .metadata
            .ensure_account(identity.as_str(), OffsetDateTime::now_utc())
            .await?;
        Ok(check_capacity(&self.policy, &account.snapshot(), requested)?)
    }

    /// Atomically reserve capacity for `bytes` of new content.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn reserve(&self, identity: &Identity, bytes: u64) -> ApiResult<Reservation> {
        if bytes > self.policy.free_tier_bytes {
            return Err(CapacityError::OverFreeTierLimit {
                requested: bytes,
                limit: self.policy.free_tier_bytes,
            }
            .into());
        }
        if bytes == 0 {
            return Ok(Reservation::settled(self.metadata.clone(), identity));
        }

        let now = OffsetDateTime::now_utc();
        let reserved = self
            .metadata
            .reserve(identity.as_str(), bytes, self.policy.free_tier_bytes, now)
            .await?;

        if !reserved {
            let remaining = self
                .metadata
                .get_account(identity.as_str())
                .await?
                .map(|account| account.snapshot().remaining(&self.policy))
                .unwrap_or(self.policy.free_tier_bytes);
            return Err(CapacityError::InsufficientCapacity {
                requested: bytes,
                remaining,
            }
            .into());
        }

        tracing::debug!(bytes, "capacity reserved");
        Ok(Reservation::new(self.metadata.clone(), identity, bytes))
    }

    /// Add `delta` to the used counter, clamped at zero.
    pub async fn apply_delta(&self, identity: &Identity, delta: i64) -> ApiResult<u64> {
        Ok(self
            .metadata
            .apply_delta(identity.as_str(), delta, OffsetDateTime::now_utc())
            .await?)
    }

    /// Overwrite the used counter with the sum of the identity's records.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn recompute_used(&self, identity: &Identity) -> ApiResult<u64> {
        QUOTA_RECOMPUTES.inc();
        let recount = self
            .metadata
            .recompute_used(identity.as_str(), OffsetDateTime::now_utc())
            .await?;
        if recount.corrected() {
            QUOTA_CORRECTIONS.inc();
            tracing::info!(
                previous = recount.previous,
                used = recount.used,
                "used bytes corrected"
            );
        }
        Ok(recount.used)
    }

    /// Current quota figures. Recomputes `used` at most once per refresh
    /// interval and never fails: on store errors the figures are estimated.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn info(&self, identity: &Identity) -> StorageInfo {
        match self.load_info(identity).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(error = %e, "quota figures unavailable, returning estimate");
                StorageInfo {
                    total_storage_used: 0,
                    total_storage_purchased: 0,
                    total_available_storage: self.policy.free_tier_bytes,
                    remaining_storage: self.policy.free_tier_bytes,
                    files_count: 0,
                    estimated: true,
                }
            }
        }
    }

    async fn load_info(&self, identity: &Identity) -> ApiResult<StorageInfo> {
        let now = OffsetDateTime::now_utc();
        let mut account = self.metadata.ensure_account(identity.as_str(), now).await?;
        let mut estimated = false;

        if self.cache.try_begin_refresh(identity.as_str()) {
            match self.recompute_used(identity).await {
                Ok(used) => account.used_bytes = used as i64,
                Err(e) => {
                    tracing::warn!(error = %e, "used bytes recomputation failed");
                    estimated = true;
                }
            }
        }

        let files_count = match self.metadata.owner_usage(identity.as_str()).await {
            Ok((_, files)) => files,
            Err(e) => {
                tracing::warn!(error = %e, "file count unavailable");
                estimated = true;
                0
            }
        };

        let snapshot = account.snapshot();
        Ok(StorageInfo {
            total_storage_used: snapshot.used,
            total_storage_purchased: snapshot.purchased,
            total_available_storage: snapshot.available(&self.policy),
            remaining_storage: snapshot.remaining(&self.policy),
            files_count,
            estimated,
        })
    }

    /// Credit one plan for a transaction hash. Replays are rejected.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn purchase(
        &self,
        identity: &Identity,
        transaction_hash: &str,
    ) -> ApiResult<StorageInfo> {
        let transaction_hash = transaction_hash.trim();
        if transaction_hash.is_empty() {
            return Err(ApiError::MissingParameter("transactionHash".to_string()));
        }
        if transaction_hash.len() > MAX_TRANSACTION_HASH_LEN
            || !transaction_hash.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ApiError::BadRequest(
                "transactionHash must be at most 128 alphanumeric characters".to_string(),
            ));
        }

        let purchase = PurchaseRow {
            transaction_hash: transaction_hash.to_lowercase(),
            identity: identity.as_str().to_string(),
            bytes: i64::try_from(self.policy.plan_bytes)
                .map_err(|_| ApiError::Internal("plan size exceeds i64".to_string()))?,
            created_at: OffsetDateTime::now_utc(),
        };

        if !self.metadata.record_purchase(&purchase).await? {
            return Err(ApiError::Conflict(format!(
                "transaction {} was already credited",
                purchase.transaction_hash
            )));
        }

        PURCHASES_CREDITED.inc();
        tracing::info!(bytes = self.policy.plan_bytes, "purchase credited");
        Ok(self.info(identity).await)
    }
}

/// Capacity held for content that is being stored.
///
/// Call [`Reservation::settle`] once the bytes were committed together with
/// their records, or [`Reservation::release`] on failure. Dropping an
/// unsettled reservation releases it in the background.
pub struct Reservation {
    metadata: Arc<dyn MetadataStore>,
    identity: String,
    bytes: u64,
    active: bool,
    runtime_handle: Option<tokio::runtime::Handle>,
}

impl Reservation {
    fn new(metadata: Arc<dyn MetadataStore>, identity: &Identity, bytes: u64) -> Self {
        Self {
            metadata,
            identity: identity.as_str().to_string(),
            bytes,
            active: true,
            runtime_handle: tokio::runtime::Handle::try_current().ok(),
        }
    }

    fn settled(metadata: Arc<dyn MetadataStore>, identity: &Identity) -> Self {
        Self {
            metadata,
            identity: identity.as_str().to_string(),
            bytes: 0,
            active: false,
            runtime_handle: None,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The reserved bytes were charged by the metadata transaction.
    pub fn settle(mut self) {
        self.active = false;
    }

    /// Give the reserved bytes back.
    pub async fn release(mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self
            .metadata
            .release(&self.identity, self.bytes, OffsetDateTime::now_utc())
            .await
        {
            tracing::error!(
                identity = %self.identity,
                bytes = self.bytes,
                error = %e,
                "failed to release reservation"
            );
        }
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("identity", &self.identity)
            .field("bytes", &self.bytes)
            .field("active", &self.active)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let Some(handle) = self.runtime_handle.as_ref() else {
            tracing::warn!(identity = %self.identity, "reservation dropped without runtime handle");
            return;
        };
        let metadata = self.metadata.clone();
        let identity = std::mem::take(&mut self.identity);
        let bytes = self.bytes;
        handle.spawn(async move {
            match metadata
                .release(&identity, bytes, OffsetDateTime::now_utc())
                .await
            {
                Ok(()) => tracing::info!(identity = %identity, bytes, "released abandoned reservation"),
                Err(e) => {
                    tracing::error!(identity = %identity, error = %e, "failed to release abandoned reservation")
                }
            }
        });
    }
}
