//! Best-effort batch persistence
//!
//! The engine persists batch snapshots through the [`BatchStore`] capability
//! so `status` and `results` queries survive a restart. Store failures are
//! degraded-mode warnings, never a reason to drop accepted work; without a
//! store the engine runs in-memory only.

use crate::core::types::BatchRecord;
use crate::utils::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Persistence capability for batch snapshots
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Save or overwrite a batch snapshot
    async fn save(&self, record: &BatchRecord) -> Result<()>;

    /// Load a batch snapshot by id
    async fn load(&self, id: &str) -> Result<Option<BatchRecord>>;

    /// Remove a batch snapshot; used by external retention policies
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory store, the default backend and the test double
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, BatchRecord>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn save(&self, record: &BatchRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<BatchRecord>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BatchPriority, BatchProgress, BatchStatus};
    use chrono::Utc;

    fn record(id: &str) -> BatchRecord {
        BatchRecord {
            id: id.to_string(),
            owner: "tenant-1".to_string(),
            priority: BatchPriority::Normal,
            status: BatchStatus::Queued,
            progress: BatchProgress {
                completed: 0,
                failed: 0,
                total: 1,
            },
            concurrency: 5,
            timeout_secs: 3600,
            continue_on_error: true,
            results: vec![],
            errors: vec![],
            statistics: None,
            reason: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = MemoryStore::new();
        store.save(&record("batch-1")).await.unwrap();

        let loaded = store.load("batch-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "batch-1");
        assert!(store.load("missing").await.unwrap().is_none());

        store.delete("batch-1").await.unwrap();
        assert!(store.load("batch-1").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemoryStore::new();
        store.save(&record("batch-1")).await.unwrap();

        let mut updated = record("batch-1");
        updated.status = BatchStatus::Completed;
        store.save(&updated).await.unwrap();

        let loaded = store.load("batch-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert_eq!(store.len(), 1);
    }
}
