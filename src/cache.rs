//! In-memory rate cache.
//!
//! The single piece of process-wide mutable state: the most recent
//! `AggregatedResult` behind an `RwLock`'d `Arc`. Readers clone the pointer;
//! the lock is never held across an await. `get()` recomputes through the
//! aggregator once the entry is older than the TTL, so API reads stay within
//! bounded staleness even if the poll loop stalls.

use crate::aggregator::Aggregator;
use crate::types::AggregatedResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Entries older than this are recomputed on read.
pub const CACHE_TTL_MS: i64 = 30_000;

struct Entry {
    result: Arc<AggregatedResult>,
    fetched_at: DateTime<Utc>,
}

pub struct RateCache {
    aggregator: Aggregator,
    inner: RwLock<Option<Entry>>,
}

impl RateCache {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            inner: RwLock::new(None),
        }
    }

    /// Cached aggregate, recomputed lazily when stale or absent.
    pub async fn get(&self) -> Arc<AggregatedResult> {
        {
            let guard = self.inner.read().await;
            if let Some(entry) = guard.as_ref() {
                let age = Utc::now() - entry.fetched_at;
                if age.num_milliseconds() <= CACHE_TTL_MS {
                    return Arc::clone(&entry.result);
                }
            }
        }
        self.refresh().await
    }

    /// Recompute via the aggregator and store the result unconditionally.
    pub async fn refresh(&self) -> Arc<AggregatedResult> {
        let result = Arc::new(self.aggregator.aggregate().await);
        self.update(Arc::clone(&result)).await;
        result
    }

    /// Unconditional write from the poll loop.
    pub async fn update(&self, result: Arc<AggregatedResult>) {
        let mut guard = self.inner.write().await;
        *guard = Some(Entry {
            result,
            fetched_at: Utc::now(),
        });
    }

    /// Milliseconds since the cached entry was written, if any.
    pub async fn age_ms(&self) -> Option<i64> {
        let guard = self.inner.read().await;
        guard
            .as_ref()
            .map(|e| (Utc::now() - e.fetched_at).num_milliseconds())
    }

    pub async fn last_fetch(&self) -> Option<DateTime<Utc>> {
        let guard = self.inner.read().await;
        guard.as_ref().map(|e| e.fetched_at)
    }

    pub async fn asset_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.as_ref().map_or(0, |e| e.result.spreads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AggregatedResult;

    fn cache() -> RateCache {
        RateCache::new(Aggregator::new(30).unwrap())
    }

    #[tokio::test]
    async fn empty_cache_reports_no_age() {
        let cache = cache();
        assert_eq!(cache.age_ms().await, None);
        assert_eq!(cache.asset_count().await, 0);
        assert!(cache.last_fetch().await.is_none());
    }

    #[tokio::test]
    async fn update_then_get_returns_same_data_within_ttl() {
        let cache = cache();
        let result = Arc::new(AggregatedResult::empty());
        cache.update(Arc::clone(&result)).await;

        let read = cache.get().await;
        assert_eq!(read.timestamp, result.timestamp);
        assert!(cache.age_ms().await.unwrap() < CACHE_TTL_MS);

        // A second reader inside the TTL observes the identical snapshot.
        let read2 = cache.get().await;
        assert!(Arc::ptr_eq(&read, &read2));
    }

    #[tokio::test]
    async fn update_replaces_previous_entry() {
        let cache = cache();
        cache.update(Arc::new(AggregatedResult::empty())).await;
        let first = cache.last_fetch().await.unwrap();

        cache.update(Arc::new(AggregatedResult::empty())).await;
        let second = cache.last_fetch().await.unwrap();
        assert!(second >= first);
    }
}
