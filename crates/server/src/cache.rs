//! Short-lived, identity-keyed listing cache.
//!
//! The cache is an optimization only. Every mutation invalidates the owner's
//! entry before the mutating request returns, so a listing fetched afterwards
//! always goes to the metadata store. A load that started before an
//! invalidation is not stored: each identity carries a generation that
//! `invalidate` bumps and `put` must match.
//!
//! Generations come from one counter and are never reused. Identities
//! without an entry share the floor generation, which every eviction pass
//! raises, so dropping idle entries cannot make an old load look current.

use dashmap::DashMap;
use pinbox_core::FileEntry;
use pinbox_core::config::CacheConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct CachedListing {
    files: Arc<Vec<FileEntry>>,
    captured_at: Instant,
}

/// Listing snapshots plus the per-identity quota refresh throttle.
pub struct ListingCache {
    enabled: bool,
    ttl: Duration,
    refresh_interval: Duration,
    listings: DashMap<String, CachedListing>,
    generations: DashMap<String, u64>,
    refreshed: DashMap<String, Instant>,
    clock: AtomicU64,
    floor: AtomicU64,
}

/// What one [`ListingCache::evict_idle`] pass dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub listings: usize,
    pub generations: usize,
    pub throttles: usize,
}

impl Evicted {
    pub fn total(&self) -> usize {
        self.listings + self.generations + self.throttles
    }
}

impl ListingCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: config.ttl(),
            refresh_interval: config.refresh_interval(),
            listings: DashMap::new(),
            generations: DashMap::new(),
            refreshed: DashMap::new(),
            clock: AtomicU64::new(0),
            floor: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh snapshot for an identity, if any. Stale entries are dropped.
    pub fn get(&self, identity: &str) -> Option<Arc<Vec<FileEntry>>> {
        if !self.enabled {
            return None;
        }
        let hit = {
            let entry = self.listings.get(identity)?;
            (entry.captured_at.elapsed() < self.ttl).then(|| entry.files.clone())
        };
        if hit.is_none() {
            self.listings.remove(identity);
        }
        hit
    }

    /// Generation to pass to [`ListingCache::put`] for a load starting now.
    pub fn generation(&self, identity: &str) -> u64 {
        self.generations
            .get(identity)
            .map(|g| *g)
            .unwrap_or_else(|| self.floor.load(Ordering::SeqCst))
    }

    /// Store a snapshot loaded at `generation`. Ignored if the identity was
    /// invalidated since.
    pub fn put(&self, identity: &str, generation: u64, files: Arc<Vec<FileEntry>>) {
        if !self.enabled {
            return;
        }
        let current = self
            .generations
            .entry(identity.to_string())
            .or_insert_with(|| self.floor.load(Ordering::SeqCst));
        if *current != generation {
            return;
        }
        // The generation entry stays locked until the snapshot is in place.
        self.listings.insert(
            identity.to_string(),
            CachedListing {
                files,
                captured_at: Instant::now(),
            },
        );
        drop(current);
    }

    /// Drop the identity's listing and reset its refresh throttle.
    pub fn invalidate(&self, identity: &str) {
        self.generations
            .insert(identity.to_string(), self.next_generation());
        self.listings.remove(identity);
        self.refreshed.remove(identity);
    }

    pub fn clear(&self) {
        self.floor.store(self.next_generation(), Ordering::SeqCst);
        self.generations.clear();
        self.listings.clear();
        self.refreshed.clear();
    }

    /// Drop expired listings, elapsed refresh throttles and the generations
    /// of identities with no cached listing.
    pub fn evict_idle(&self) -> Evicted {
        let mut evicted = Evicted::default();

        let before = self.listings.len();
        self.listings
            .retain(|_, listing| listing.captured_at.elapsed() < self.ttl);
        evicted.listings = before.saturating_sub(self.listings.len());

        let before = self.refreshed.len();
        self.refreshed
            .retain(|_, last| last.elapsed() < self.refresh_interval);
        evicted.throttles = before.saturating_sub(self.refreshed.len());

        // Raise the floor first: a load holding an evicted generation must
        // not match the floor afterwards.
        self.floor.store(self.next_generation(), Ordering::SeqCst);
        let before = self.generations.len();
        self.generations
            .retain(|identity, _| self.listings.contains_key(identity));
        evicted.generations = before.saturating_sub(self.generations.len());

        evicted
    }

    /// Identities with a generation entry.
    pub fn tracked(&self) -> usize {
        self.generations.len()
    }

    /// Whether a quota recomputation may run now. Records the attempt when it
    /// may, so concurrent callers within the interval are refused.
    pub fn try_begin_refresh(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut allowed = false;
        self.refreshed
            .entry(identity.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) >= self.refresh_interval {
                    *last = now;
                    allowed = true;
                }
            })
            .or_insert_with(|| {
                allowed = true;
                now
            });
        allowed
    }

    /// Number of cached listings.
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn entry(cid: &str) -> FileEntry {
        let now = OffsetDateTime::now_utc();
        FileEntry {
            id: cid.to_string(),
            cid: cid.to_string(),
            name: cid.to_string(),
            size: "1".to_string(),
            formatted_size: "1 B".to_string(),
            mime_type: "text/plain".to_string(),
            wallet_address: "0xabc".to_string(),
            is_folder: false,
            parent_folder: None,
            folder_path: "/".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn cache(ttl_ms: u64, refresh_ms: u64) -> ListingCache {
        let mut cache = ListingCache::new(&CacheConfig::default());
        cache.ttl = Duration::from_millis(ttl_ms);
        cache.refresh_interval = Duration::from_millis(refresh_ms);
        cache
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = ListingCache::new(&CacheConfig::default());
        assert!(cache.get("0xabc").is_none());

        cache.put("0xabc", 0, Arc::new(vec![entry("a")]));
        assert_eq!(cache.get("0xabc").unwrap().len(), 1);
        assert!(cache.get("0xother").is_none());

        cache.invalidate("0xabc");
        assert!(cache.get("0xabc").is_none());

        cache.put("0xabc", cache.generation("0xabc"), Arc::new(vec![]));
        cache.put("0xother", cache.generation("0xother"), Arc::new(vec![]));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_racing_invalidation_is_dropped() {
        let cache = ListingCache::new(&CacheConfig::default());
        let generation = cache.generation("0xabc");

        // A mutation lands while the listing is being loaded.
        cache.invalidate("0xabc");
        cache.put("0xabc", generation, Arc::new(vec![entry("stale")]));
        assert!(cache.get("0xabc").is_none());

        let generation = cache.generation("0xabc");
        cache.put("0xabc", generation, Arc::new(vec![entry("fresh")]));
        assert_eq!(cache.get("0xabc").unwrap()[0].cid, "fresh");

        let generation = cache.generation("0xabc");
        cache.clear();
        cache.put("0xabc", generation, Arc::new(vec![]));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = cache(30, 10_000);
        cache.put("0xabc", 0, Arc::new(vec![entry("a")]));
        assert!(cache.get("0xabc").is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get("0xabc").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = ListingCache::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.put("0xabc", 0, Arc::new(vec![entry("a")]));
        assert!(cache.get("0xabc").is_none());
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_refresh_throttle() {
        let cache = cache(10_000, 40);
        assert!(cache.try_begin_refresh("0xabc"));
        assert!(!cache.try_begin_refresh("0xabc"));
        assert!(cache.try_begin_refresh("0xother"));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.try_begin_refresh("0xabc"));

        // A mutation resets the throttle.
        cache.invalidate("0xabc");
        assert!(cache.try_begin_refresh("0xabc"));
    }

    #[tokio::test]
    async fn test_evict_idle_drops_expired_state() {
        let cache = cache(30, 30);
        cache.put("0xabc", cache.generation("0xabc"), Arc::new(vec![entry("a")]));
        cache.invalidate("0xother");
        assert!(cache.try_begin_refresh("0xother"));

        // Nothing has expired yet; only the listing-less generation goes.
        let evicted = cache.evict_idle();
        assert_eq!(evicted.listings, 0);
        assert_eq!(evicted.throttles, 0);
        assert_eq!(evicted.generations, 1);
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let evicted = cache.evict_idle();
        assert_eq!(evicted.listings, 1);
        assert_eq!(evicted.throttles, 1);
        assert_eq!(evicted.generations, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.tracked(), 0);
    }

    #[test]
    fn test_eviction_does_not_revive_a_stale_load() {
        let cache = ListingCache::new(&CacheConfig::default());

        // Loads that began before an invalidation that was later evicted.
        let unseen = cache.generation("0xabc");
        cache.invalidate("0xabc");
        let seen = cache.generation("0xabc");
        cache.invalidate("0xabc");
        cache.evict_idle();
        assert_eq!(cache.tracked(), 0);

        cache.put("0xabc", unseen, Arc::new(vec![entry("stale")]));
        cache.put("0xabc", seen, Arc::new(vec![entry("stale")]));
        assert!(cache.get("0xabc").is_none());

        let fresh = cache.generation("0xabc");
        cache.put("0xabc", fresh, Arc::new(vec![entry("fresh")]));
        assert_eq!(cache.get("0xabc").unwrap()[0].cid, "fresh");
    }
}
