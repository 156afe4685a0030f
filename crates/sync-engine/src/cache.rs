//! Tiered cache bookkeeping.
//!
//! Only timestamps are tracked here, never payloads: the engine owns the data
//! and asks the cache manager whether a resource kind is due for a refresh.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::config::SyncConfig;

/// Resource kinds with an independent cache lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Stocks,
    IndexPrice,
    News,
    Sentiment,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Stocks,
        ResourceKind::IndexPrice,
        ResourceKind::News,
        ResourceKind::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Stocks => "stocks",
            ResourceKind::IndexPrice => "index_price",
            ResourceKind::News => "news",
            ResourceKind::Sentiment => "sentiment",
        }
    }
}

/// Time source in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for deterministic tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Last successful fetch for one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub kind: ResourceKind,
    pub last_fetched_at_millis: i64,
    pub ttl_millis: i64,
}

impl CacheEntry {
    pub fn is_stale(&self, now_millis: i64) -> bool {
        now_millis - self.last_fetched_at_millis > self.ttl_millis
    }
}

/// Per-resource-kind TTL tracking.
///
/// The entry set is bounded by the number of resource kinds, so there is no
/// eviction. Failed fetches must not call [`CacheManager::mark_refreshed`].
pub struct CacheManager {
    ttls: [(ResourceKind, i64); 4],
    entries: DashMap<ResourceKind, CacheEntry>,
}

impl CacheManager {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            ttls: [
                (ResourceKind::Stocks, config.stocks_ttl.as_millis() as i64),
                (ResourceKind::IndexPrice, config.index_ttl.as_millis() as i64),
                (ResourceKind::News, config.news_ttl.as_millis() as i64),
                (ResourceKind::Sentiment, config.sentiment_ttl.as_millis() as i64),
            ],
            entries: DashMap::new(),
        }
    }

    pub fn ttl_millis(&self, kind: ResourceKind) -> i64 {
        self.ttls
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, ttl)| *ttl)
            .unwrap_or(0)
    }

    /// A kind with no entry is always stale.
    pub fn should_refresh(&self, kind: ResourceKind, now_millis: i64) -> bool {
        let stale = self
            .entries
            .get(&kind)
            .map(|entry| entry.is_stale(now_millis))
            .unwrap_or(true);
        tracing::debug!("Cache check for {}: stale={}", kind.as_str(), stale);
        stale
    }

    pub fn mark_refreshed(&self, kind: ResourceKind, now_millis: i64) {
        self.entries.insert(
            kind,
            CacheEntry {
                kind,
                last_fetched_at_millis: now_millis,
                ttl_millis: self.ttl_millis(kind),
            },
        );
    }

    pub fn entry(&self, kind: ResourceKind) -> Option<CacheEntry> {
        self.entries.get(&kind).map(|entry| *entry)
    }

    /// Forget one kind so the next check reports stale.
    pub fn invalidate(&self, kind: ResourceKind) {
        self.entries.remove(&kind);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls() {
        let cache = CacheManager::new(&SyncConfig::default());
        assert_eq!(cache.ttl_millis(ResourceKind::Stocks), 120_000);
        assert_eq!(cache.ttl_millis(ResourceKind::IndexPrice), 120_000);
        assert_eq!(cache.ttl_millis(ResourceKind::News), 300_000);
        assert_eq!(cache.ttl_millis(ResourceKind::Sentiment), 180_000);
    }

    #[test]
    fn test_ttl_boundary_for_every_kind() {
        let cache = CacheManager::new(&SyncConfig::default());
        let start = 1_700_000_000_000;

        for kind in ResourceKind::ALL {
            let ttl = cache.ttl_millis(kind);

            assert!(cache.should_refresh(kind, start), "{:?} fresh before any fetch", kind);

            cache.mark_refreshed(kind, start);
            assert!(!cache.should_refresh(kind, start));
            // Boundary: exactly ttl old is still fresh, one millisecond later it is stale
            assert!(!cache.should_refresh(kind, start + ttl));
            assert!(cache.should_refresh(kind, start + ttl + 1));
        }
    }

    #[test]
    fn test_kinds_are_independent() {
        let cache = CacheManager::new(&SyncConfig::default());
        cache.mark_refreshed(ResourceKind::News, 0);

        assert!(!cache.should_refresh(ResourceKind::News, 1_000));
        assert!(cache.should_refresh(ResourceKind::Stocks, 1_000));
        assert!(cache.should_refresh(ResourceKind::Sentiment, 1_000));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = CacheManager::new(&SyncConfig::default());
        for kind in ResourceKind::ALL {
            cache.mark_refreshed(kind, 0);
        }

        cache.invalidate(ResourceKind::Stocks);
        assert!(cache.should_refresh(ResourceKind::Stocks, 0));
        assert!(!cache.should_refresh(ResourceKind::News, 0));

        cache.clear();
        for kind in ResourceKind::ALL {
            assert!(cache.entry(kind).is_none());
            assert!(cache.should_refresh(kind, 0));
        }
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_millis(), 42);
    }
}
