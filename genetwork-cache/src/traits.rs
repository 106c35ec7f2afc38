//! Backend contract and usage statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use genetwork_core::{CacheEntry, GenetworkResult};

/// Result of a successful store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    /// An entry was evicted to get back under capacity.
    pub evicted: bool,
    /// Storage conflicts retried before the store went through.
    pub conflicts: u32,
}

/// Read/write/evict contract every storage strategy implements.
///
/// A backend is bound to one identity's partition of one cache for the
/// duration of a call. Implementations keep the partition at or below
/// [`max_size`](Self::max_size) entries after every store.
pub trait CacheBackend {
    /// Fetch an entry. Never refreshes `last_access`.
    fn lookup(&mut self, key: &str) -> GenetworkResult<Option<CacheEntry>>;

    /// Insert or overwrite an entry stamped with the current access time,
    /// evicting once if the partition is then over capacity.
    fn store(&mut self, key: &str, value: &str) -> GenetworkResult<StoreOutcome>;

    /// Remove the least recently used entry. Returns false if the partition
    /// was empty.
    fn evict(&mut self) -> GenetworkResult<bool>;

    /// Number of entries in the partition.
    fn len(&self) -> GenetworkResult<usize>;

    fn is_empty(&self) -> GenetworkResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Signal that the partition is about to be accessed. Client-held
    /// backends flag their container so it is re-issued.
    fn touch(&mut self) {}

    fn max_size(&self) -> usize;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of completed stores.
    pub stores: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of storage conflicts that were retried.
    pub conflicts: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    conflicts: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self, outcome: StoreOutcome) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        if outcome.evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.conflicts
            .fetch_add(u64::from(outcome.conflicts), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = CacheCounters::default();
        counters.record_miss();
        counters.record_store(StoreOutcome {
            evicted: true,
            conflicts: 2,
        });
        counters.record_hit();
        counters.record_store(StoreOutcome::default());

        let stats = counters.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.conflicts, 2);
    }
}
