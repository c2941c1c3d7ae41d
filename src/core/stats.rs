//! Engine-wide counters
//!
//! Lock-free atomics updated from the dispatch hot path, snapshotted into a
//! serializable view for the statistics query.

use crate::core::cache::CacheStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic engine counters
#[derive(Debug, Default)]
pub struct AtomicEngineStats {
    /// Batches accepted by submit
    pub batches_submitted: AtomicU64,
    /// Batches finalized as completed
    pub batches_completed: AtomicU64,
    /// Batches finalized as failed
    pub batches_failed: AtomicU64,
    /// Batches finalized as cancelled
    pub batches_cancelled: AtomicU64,
    /// Sub-requests settled successfully
    pub subrequests_completed: AtomicU64,
    /// Sub-requests settled with an error
    pub subrequests_failed: AtomicU64,
    /// Extra executor attempts beyond the first, across all sub-requests
    pub retries: AtomicU64,
}

impl AtomicEngineStats {
    /// Snapshot the counters together with cache and scheduler state
    pub fn snapshot(
        &self,
        cache: CacheStats,
        active_batches: usize,
        queued_batches: usize,
    ) -> EngineStatistics {
        EngineStatistics {
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_cancelled: self.batches_cancelled.load(Ordering::Relaxed),
            subrequests_completed: self.subrequests_completed.load(Ordering::Relaxed),
            subrequests_failed: self.subrequests_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            active_batches,
            queued_batches,
            cache,
        }
    }
}

/// Statistics snapshot returned to callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatistics {
    /// Batches accepted by submit
    pub batches_submitted: u64,
    /// Batches finalized as completed
    pub batches_completed: u64,
    /// Batches finalized as failed
    pub batches_failed: u64,
    /// Batches finalized as cancelled
    pub batches_cancelled: u64,
    /// Sub-requests settled successfully
    pub subrequests_completed: u64,
    /// Sub-requests settled with an error
    pub subrequests_failed: u64,
    /// Extra executor attempts beyond the first
    pub retries: u64,
    /// Currently admitted batches
    pub active_batches: usize,
    /// Batches waiting in the priority lanes
    pub queued_batches: usize,
    /// Result cache counters
    pub cache: CacheStats,
}
