//! Storage quota arithmetic.
//!
//! Counters live in the metadata store; this module only holds the policy
//! and the pure capacity rules applied to a snapshot of them.

use serde::{Deserialize, Serialize};

/// Quota policy derived from configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Baseline allotment every identity has without purchase.
    pub free_tier_bytes: u64,
    /// Bytes credited per purchase.
    pub plan_bytes: u64,
}

/// Point-in-time view of an identity's counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub used: u64,
    pub purchased: u64,
    pub reserved: u64,
}

impl QuotaSnapshot {
    /// `freeTier + purchased`.
    pub fn available(&self, policy: &QuotaPolicy) -> u64 {
        policy.free_tier_bytes.saturating_add(self.purchased)
    }

    /// `max(0, available - used - reserved)`.
    pub fn remaining(&self, policy: &QuotaPolicy) -> u64 {
        self.available(policy)
            .saturating_sub(self.used)
            .saturating_sub(self.reserved)
    }
}

/// Why a capacity check failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("file of {requested} bytes exceeds the free tier limit of {limit} bytes")]
    OverFreeTierLimit { requested: u64, limit: u64 },

    #[error("insufficient storage: {requested} bytes requested, {remaining} bytes remaining")]
    InsufficientCapacity { requested: u64, remaining: u64 },
}

/// Successful capacity check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityCheck {
    pub remaining: u64,
    pub limit: u64,
    pub used: u64,
}

/// Apply the capacity rules to a snapshot.
///
/// A single object may never exceed the free tier, whatever was purchased.
pub fn check_capacity(
    policy: &QuotaPolicy,
    snapshot: &QuotaSnapshot,
    requested: u64,
) -> Result<CapacityCheck, CapacityError> {
    if requested > policy.free_tier_bytes {
        return Err(CapacityError::OverFreeTierLimit {
            requested,
            limit: policy.free_tier_bytes,
        });
    }
    let remaining = snapshot.remaining(policy);
    if requested > remaining {
        return Err(CapacityError::InsufficientCapacity {
            requested,
            remaining,
        });
    }
    Ok(CapacityCheck {
        remaining,
        limit: snapshot.available(policy),
        used: snapshot.used,
    })
}
