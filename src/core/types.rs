//! Batch engine types and data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn default_true() -> bool {
    true
}

/// Priority lane for batch admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    /// Admitted before all other lanes
    High,
    /// Default lane
    Normal,
    /// Admitted only when higher lanes are empty; may starve under
    /// sustained high-priority load
    Low,
}

impl BatchPriority {
    /// Lane index in admission order (0 is served first)
    pub fn lane(&self) -> usize {
        match self {
            BatchPriority::High => 0,
            BatchPriority::Normal => 1,
            BatchPriority::Low => 2,
        }
    }
}

/// Batch lifecycle status
///
/// Transitions are one-way: `Completed`, `Failed`, and `Cancelled` are
/// terminal and sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Waiting in a priority lane
    Queued,
    /// Admitted and dispatching sub-requests
    Processing,
    /// All sub-requests settled without a batch-level failure
    Completed,
    /// Batch-level failure (fail-fast, timeout, or restart recovery)
    Failed,
    /// Explicitly cancelled by the caller
    Cancelled,
}

impl BatchStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (*self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

/// One inference call within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubRequest {
    /// Position in the submitted batch; defines result ordering
    pub index: usize,
    /// Opaque inference payload (model, messages, parameters)
    pub payload: serde_json::Value,
}

impl SubRequest {
    /// Stable content fingerprint of the payload, used as the cache key.
    ///
    /// `serde_json::Value` objects keep their keys sorted, so serializing
    /// the payload yields a canonical form regardless of submission order.
    pub fn fingerprint(&self) -> String {
        let canonical = self.payload.to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }
}

/// Outcome of one resolved sub-request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubResult {
    /// Index of the originating sub-request
    pub index: usize,
    /// Result payload on success
    pub output: Option<serde_json::Value>,
    /// Classified error on failure
    pub error: Option<SubError>,
    /// Whether the result came from the cache
    pub cached: bool,
    /// Executor attempts made (0 for a cache hit)
    pub attempts: u32,
    /// Wall-clock time spent resolving, milliseconds
    pub duration_ms: u64,
    /// When the sub-request settled
    pub completed_at: DateTime<Utc>,
}

impl SubResult {
    /// Whether this outcome is a success
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Recorded failure of one sub-request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubError {
    /// Index of the originating sub-request
    pub index: usize,
    /// Classified error code (e.g. `rate_limit`, `server_error`)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Whether the error was classified as retryable
    pub retryable: bool,
    /// Transport status code, if the failure carried one
    pub status: Option<u16>,
}

/// Progress counters for a batch
///
/// Invariant: `completed + failed <= total` at every instant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Successfully settled sub-requests
    pub completed: u32,
    /// Failed sub-requests
    pub failed: u32,
    /// Total sub-requests in the batch
    pub total: u32,
}

impl BatchProgress {
    /// Number of sub-requests that have settled either way
    pub fn settled(&self) -> u32 {
        self.completed + self.failed
    }
}

/// Caller-supplied batch submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSpec {
    /// Optional caller-supplied id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Owning tenant id
    pub owner: String,
    /// Ordered sub-request payloads
    pub requests: Vec<serde_json::Value>,
    /// Priority lane; defaults to normal
    #[serde(default)]
    pub priority: Option<BatchPriority>,
    /// Per-batch concurrency limit; defaults to min(5, global max)
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Overall batch timeout in seconds; defaults from engine limits
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Keep dispatching after individual failures (default true)
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

/// Aggregate statistics computed at finalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Total sub-requests
    pub total: u32,
    /// Successful sub-requests
    pub succeeded: u32,
    /// Failed sub-requests
    pub failed: u32,
    /// Results served from the cache
    pub cache_hits: u32,
    /// Average resolution latency over settled sub-requests, milliseconds
    pub avg_duration_ms: u64,
    /// Fraction of settled sub-requests that succeeded
    pub success_rate: f64,
}

/// Full batch snapshot: the unit persisted to the store and returned from
/// result queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Unique batch id
    pub id: String,
    /// Owning tenant id
    pub owner: String,
    /// Priority lane
    pub priority: BatchPriority,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Progress counters
    pub progress: BatchProgress,
    /// Per-batch concurrency limit
    pub concurrency: usize,
    /// Overall timeout, seconds
    pub timeout_secs: u64,
    /// Keep dispatching after individual failures
    pub continue_on_error: bool,
    /// Settled results, ordered by sub-request index
    pub results: Vec<SubResult>,
    /// Recorded failures, ordered by sub-request index
    pub errors: Vec<SubError>,
    /// Aggregate statistics, present once finalized
    pub statistics: Option<BatchStatistics>,
    /// Reason string for cancelled/failed terminal states
    pub reason: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Admission timestamp
    pub started_at: Option<DateTime<Utc>>,
    /// Finalization timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lightweight batch projection for status and listing queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Batch id
    pub id: String,
    /// Owning tenant id
    pub owner: String,
    /// Priority lane
    pub priority: BatchPriority,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Progress counters
    pub progress: BatchProgress,
    /// Aggregate statistics, present once finalized
    pub statistics: Option<BatchStatistics>,
    /// Terminal reason, if any
    pub reason: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Admission timestamp
    pub started_at: Option<DateTime<Utc>>,
    /// Finalization timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&BatchRecord> for BatchSummary {
    fn from(record: &BatchRecord) -> Self {
        Self {
            id: record.id.clone(),
            owner: record.owner.clone(),
            priority: record.priority,
            status: record.status,
            progress: record.progress,
            statistics: record.statistics.clone(),
            reason: record.reason.clone(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

/// Pagination and projection options for result queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsQuery {
    /// Maximum number of results to return
    #[serde(default)]
    pub limit: Option<usize>,
    /// Number of results to skip
    #[serde(default)]
    pub offset: Option<usize>,
    /// Include the recorded error list in the response
    #[serde(default)]
    pub include_errors: bool,
}

/// Page of settled results plus the current progress snapshot.
///
/// Never blocks on unfinished work: a `processing` batch returns whatever
/// has settled so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Batch id
    pub id: String,
    /// Lifecycle status at read time
    pub status: BatchStatus,
    /// Progress counters at read time
    pub progress: BatchProgress,
    /// Settled results in sub-request index order
    pub results: Vec<SubResult>,
    /// Recorded errors, when requested
    pub errors: Option<Vec<SubError>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_lane_order() {
        assert!(BatchPriority::High.lane() < BatchPriority::Normal.lane());
        assert!(BatchPriority::Normal.lane() < BatchPriority::Low.lane());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!BatchStatus::Queued.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_transitions_one_way() {
        use BatchStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));

        // A queued batch can only start or be cancelled
        assert!(!Queued.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Completed));

        // Terminal states are sticky
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Processing));
        // Processing never re-enters the queue
        assert!(!Processing.can_transition_to(Queued));
    }

    #[test]
    fn test_fingerprint_is_stable_across_key_order() {
        let a = SubRequest {
            index: 0,
            payload: json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]}),
        };
        let b = SubRequest {
            index: 7,
            payload: json!({"messages": [{"role": "user", "content": "hi"}], "model": "gpt-4"}),
        };
        // Same content, different index and key order: same fingerprint
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_on_content() {
        let a = SubRequest {
            index: 0,
            payload: json!({"model": "gpt-4", "temperature": 0.1}),
        };
        let b = SubRequest {
            index: 0,
            payload: json!({"model": "gpt-4", "temperature": 0.2}),
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_progress_settled() {
        let progress = BatchProgress {
            completed: 3,
            failed: 2,
            total: 10,
        };
        assert_eq!(progress.settled(), 5);
        assert!(progress.settled() <= progress.total);
    }

    #[test]
    fn test_batch_spec_deserialization_defaults() {
        let json = r#"{"owner": "tenant-1", "requests": [{"model": "gpt-4"}]}"#;
        let spec: BatchSpec = serde_json::from_str(json).unwrap();
        assert!(spec.id.is_none());
        assert!(spec.priority.is_none());
        assert!(spec.continue_on_error);
    }

    #[test]
    fn test_batch_record_serialization_round_trip() {
        let record = BatchRecord {
            id: "batch-1".to_string(),
            owner: "tenant-1".to_string(),
            priority: BatchPriority::Normal,
            status: BatchStatus::Queued,
            progress: BatchProgress {
                completed: 0,
                failed: 0,
                total: 2,
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
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: BatchRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "batch-1");
        assert_eq!(back.status, BatchStatus::Queued);
        assert_eq!(back.progress.total, 2);
    }
}
