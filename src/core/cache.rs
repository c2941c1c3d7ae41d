//! Content-addressable result cache
//!
//! Memoizes executor outcomes keyed by the sub-request fingerprint. Entries
//! expire after a configurable TTL, checked lazily on read and swept
//! periodically on write. The cache is shared across all batches: a hit in
//! one batch can satisfy an identical sub-request in another.
//!
//! Two near-simultaneous identical requests may both compute; the second
//! `put` simply overwrites the first. Duplicate computation on an exact race
//! is accepted. A partially written entry is never returned, since `DashMap`
//! insertions are atomic.

use crate::config::CacheConfig;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// How many writes between expiry sweeps
const SWEEP_EVERY: u64 = 256;

/// A cached executor outcome
#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    inserted_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Lock-free cache counters updated on the hot path
#[derive(Debug, Default)]
struct AtomicCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

/// Cache statistics snapshot returned to callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads served from a live entry
    pub hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Entries dropped to stay under the size cap
    pub evictions: u64,
    /// Live entries at snapshot time
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of reads served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL-bounded memo of executor outcomes, keyed by payload fingerprint
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    stats: AtomicCacheStats,
    writes: AtomicU64,
}

impl ResultCache {
    /// Create a cache from its configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats: AtomicCacheStats::default(),
            writes: AtomicU64::new(0),
        }
    }

    /// Look up a fingerprint; an entry past its TTL counts as a miss and is
    /// removed on the spot
    pub fn get(&self, fingerprint: &str) -> Option<serde_json::Value> {
        if let Some(entry) = self.entries.get(fingerprint) {
            if !entry.is_expired() {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Expired: drop it outside the read guard
        self.entries.remove(fingerprint);
        self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite an entry for a fingerprint
    pub fn put(&self, fingerprint: String, value: serde_json::Value) {
        let now = Instant::now();
        self.entries.insert(
            fingerprint,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + self.config.ttl(),
            },
        );

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY == 0 {
            self.sweep_expired();
        }
        self.enforce_capacity();
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn sweep_expired(&self) {
        let mut removed = 0u64;
        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.stats.expirations.fetch_add(removed, Ordering::Relaxed);
            info!(removed, "swept expired cache entries");
        }
    }

    /// Evict oldest entries while over the size cap. The cap can only be
    /// exceeded by a handful of racing writers, so the linear scan per
    /// eviction stays cheap.
    fn enforce_capacity(&self) {
        while self.entries.len() > self.config.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().inserted_at)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, "evicted oldest cache entry over capacity");
                }
                None => break,
            }
        }
    }
}
