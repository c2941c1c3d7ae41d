//! Batch lifecycle management: the engine's public surface
//!
//! [`BatchEngine`] owns every batch end-to-end: it validates submissions,
//! drives the priority scheduler, dispatches admitted batches through the
//! request executor under the global and per-batch concurrency gates, and
//! finalizes each batch with aggregate statistics and a persisted snapshot.

use crate::config::EngineConfig;
use crate::core::cache::ResultCache;
use crate::core::executor::{InferenceExecutor, RequestExecutor};
use crate::core::gate::ConcurrencyGate;
use crate::core::retry::RetryPolicy;
use crate::core::scheduler::PriorityScheduler;
use crate::core::stats::{AtomicEngineStats, EngineStatistics};
use crate::core::types::{
    BatchPriority, BatchProgress, BatchRecord, BatchResults, BatchSpec, BatchStatistics,
    BatchStatus, BatchSummary, ResultsQuery, SubRequest, SubResult,
};
use crate::storage::BatchStore;
use crate::utils::error::{EngineError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-batch runtime state owned by the engine
struct BatchState {
    record: BatchRecord,
    requests: Arc<Vec<SubRequest>>,
    timeout: Duration,
    /// Set when admitted; dispatch stops once it passes
    deadline: Option<Instant>,
    /// Stop admitting new sub-requests (cancel, fail-fast, timeout)
    halt: bool,
    /// The halt came from the batch deadline
    timed_out: bool,
}

/// Batch scheduling and resilient-execution engine
pub struct BatchEngine {
    config: EngineConfig,
    resolver: RequestExecutor,
    cache: Arc<ResultCache>,
    global_gate: ConcurrencyGate,
    scheduler: PriorityScheduler,
    batches: RwLock<HashMap<String, BatchState>>,
    store: Option<Arc<dyn BatchStore>>,
    stats: AtomicEngineStats,
    wake: Arc<Notify>,
}

impl BatchEngine {
    /// Create an engine and start its scheduler tick loop.
    ///
    /// Must be called from within a Tokio runtime. Without a store the
    /// engine operates in-memory only.
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn InferenceExecutor>,
        store: Option<Arc<dyn BatchStore>>,
    ) -> Arc<Self> {
        let cache = Arc::new(ResultCache::new(config.cache.clone()));
        let resolver = RequestExecutor::new(
            executor,
            Arc::clone(&cache),
            RetryPolicy::new(config.retry.clone()),
            config.limits.request_timeout(),
        );

        let engine = Arc::new(Self {
            global_gate: ConcurrencyGate::new(config.scheduler.max_global_concurrency),
            scheduler: PriorityScheduler::new(config.scheduler.max_concurrent_batches),
            batches: RwLock::new(HashMap::new()),
            cache,
            resolver,
            store,
            stats: AtomicEngineStats::default(),
            wake: Arc::new(Notify::new()),
            config,
        });

        engine.spawn_scheduler_loop();
        engine
    }

    /// Validate and accept a batch, enqueueing it for admission
    pub async fn submit(&self, spec: BatchSpec) -> Result<BatchRecord> {
        self.validate(&spec)?;

        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| format!("batch-{}", Uuid::new_v4()));
        let priority = spec.priority.unwrap_or(BatchPriority::Normal);
        let concurrency = spec
            .concurrency
            .unwrap_or(self.config.limits.default_batch_concurrency)
            .clamp(1, self.config.scheduler.max_global_concurrency);
        let timeout_secs = spec
            .timeout_secs
            .unwrap_or(self.config.limits.default_batch_timeout_secs)
            .max(1);

        let requests: Vec<SubRequest> = spec
            .requests
            .into_iter()
            .enumerate()
            .map(|(index, payload)| SubRequest { index, payload })
            .collect();

        let record = BatchRecord {
            id: id.clone(),
            owner: spec.owner,
            priority,
            status: BatchStatus::Queued,
            progress: BatchProgress {
                completed: 0,
                failed: 0,
                total: requests.len() as u32,
            },
            concurrency,
            timeout_secs,
            continue_on_error: spec.continue_on_error,
            results: Vec::new(),
            errors: Vec::new(),
            statistics: None,
            reason: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        {
            let mut batches = self.batches.write().await;
            if batches.contains_key(&id) {
                return Err(EngineError::Validation(format!(
                    "batch id already exists: {id}"
                )));
            }
            batches.insert(
                id.clone(),
                BatchState {
                    record: record.clone(),
                    requests: Arc::new(requests),
                    timeout: Duration::from_secs(timeout_secs),
                    deadline: None,
                    halt: false,
                    timed_out: false,
                },
            );
        }

        self.persist(&record).await;
        self.scheduler.enqueue(id.clone(), priority);
        self.stats.batches_submitted.fetch_add(1, Ordering::Relaxed);
        self.wake.notify_one();

        info!(
            batch_id = %id,
            owner = %record.owner,
            total = record.progress.total,
            ?priority,
            "batch submitted"
        );
        Ok(record)
    }

    /// Cancel a queued or processing batch.
    ///
    /// Cancellation is cooperative: no new sub-requests are dispatched, but
    /// work already handed to the executor settles naturally and its results
    /// are still recorded.
    pub async fn cancel(&self, id: &str, reason: &str) -> Result<BatchSummary> {
        let (summary, was_queued, record) = {
            let mut batches = self.batches.write().await;
            let state = batches
                .get_mut(id)
                .ok_or_else(|| EngineError::NotFound(format!("batch not found: {id}")))?;

            match state.record.status {
                BatchStatus::Queued => {
                    state.record.status = BatchStatus::Cancelled;
                    state.record.reason = Some(reason.to_string());
                    state.record.completed_at = Some(Utc::now());
                    state.halt = true;
                    (
                        BatchSummary::from(&state.record),
                        true,
                        state.record.clone(),
                    )
                }
                BatchStatus::Processing => {
                    state.record.status = BatchStatus::Cancelled;
                    state.record.reason = Some(reason.to_string());
                    state.halt = true;
                    (
                        BatchSummary::from(&state.record),
                        false,
                        state.record.clone(),
                    )
                }
                status => {
                    return Err(EngineError::InvalidState(format!(
                        "batch {id} cannot be cancelled in status {status:?}"
                    )));
                }
            }
        };

        info!(batch_id = %id, %reason, "batch cancelled");

        if was_queued {
            // Never admitted: no dispatch loop will finalize it
            self.scheduler.remove(id);
            self.stats.batches_cancelled.fetch_add(1, Ordering::Relaxed);
            self.persist(&record).await;
        }
        Ok(summary)
    }

    /// Read-only status projection
    pub async fn status(&self, id: &str) -> Result<BatchSummary> {
        let batches = self.batches.read().await;
        batches
            .get(id)
            .map(|state| BatchSummary::from(&state.record))
            .ok_or_else(|| EngineError::NotFound(format!("batch not found: {id}")))
    }

    /// Page through settled results in sub-request index order.
    ///
    /// Never blocks on unfinished work: a processing batch returns whatever
    /// has settled so far plus the current progress.
    pub async fn results(&self, id: &str, query: &ResultsQuery) -> Result<BatchResults> {
        let batches = self.batches.read().await;
        let state = batches
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("batch not found: {id}")))?;

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        let results: Vec<SubResult> = state
            .record
            .results
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(BatchResults {
            id: state.record.id.clone(),
            status: state.record.status,
            progress: state.record.progress,
            results,
            errors: query
                .include_errors
                .then(|| state.record.errors.clone()),
        })
    }

    /// List known batches, optionally filtered by owner and status,
    /// newest first
    pub async fn list(
        &self,
        owner: Option<&str>,
        status: Option<BatchStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<BatchSummary> {
        let batches = self.batches.read().await;
        let mut summaries: Vec<BatchSummary> = batches
            .values()
            .filter(|state| owner.is_none_or(|owner| state.record.owner == owner))
            .filter(|state| status.is_none_or(|status| state.record.status == status))
            .map(|state| BatchSummary::from(&state.record))
            .collect();

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.into_iter().skip(offset).take(limit).collect()
    }

    /// Engine-wide counters snapshot
    pub fn statistics(&self) -> EngineStatistics {
        self.stats.snapshot(
            self.cache.stats(),
            self.scheduler.active(),
            self.scheduler.queued(),
        )
    }

    /// Load a batch snapshot from the store after a restart.
    ///
    /// A batch found queued or processing was interrupted mid-flight; it is
    /// surfaced as failed rather than silently re-admitted.
    pub async fn recover(&self, id: &str) -> Result<Option<BatchRecord>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(mut record) = store.load(id).await? else {
            return Ok(None);
        };

        if !record.status.is_terminal() {
            warn!(batch_id = %id, status = ?record.status, "recovering interrupted batch as failed");
            record.status = BatchStatus::Failed;
            record.reason = Some("interrupted by restart".to_string());
            record.completed_at = Some(Utc::now());
            if let Err(error) = store.save(&record).await {
                warn!(batch_id = %id, %error, "failed to persist recovered batch");
            }
        }

        let timeout = Duration::from_secs(record.timeout_secs);
        let mut batches = self.batches.write().await;
        batches.entry(record.id.clone()).or_insert(BatchState {
            record: record.clone(),
            requests: Arc::new(Vec::new()),
            timeout,
            deadline: None,
            halt: true,
            timed_out: false,
        });
        Ok(Some(record))
    }

    fn validate(&self, spec: &BatchSpec) -> Result<()> {
        if spec.requests.is_empty() {
            return Err(EngineError::Validation(
                "batch must contain at least one request".to_string(),
            ));
        }
        if spec.requests.len() > self.config.limits.max_batch_size {
            return Err(EngineError::Validation(format!(
                "batch size {} exceeds maximum of {}",
                spec.requests.len(),
                self.config.limits.max_batch_size
            )));
        }
        if spec.owner.is_empty() {
            return Err(EngineError::Validation("owner must not be empty".to_string()));
        }
        for (index, payload) in spec.requests.iter().enumerate() {
            let model = payload.get("model").and_then(|value| value.as_str());
            if !payload.is_object() || model.is_none_or(str::is_empty) {
                return Err(EngineError::Validation(format!(
                    "request {index} must be an object with a non-empty model field"
                )));
            }
        }
        Ok(())
    }

    /// Single tick loop driving admissions; woken by submit/finalize and a
    /// fixed interval. Holds only a weak reference so dropping the engine
    /// stops the loop.
    fn spawn_scheduler_loop(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let wake = Arc::clone(&self.wake);
        let tick_interval = self.config.scheduler.tick_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = interval.tick() => {}
                }
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.run_admissions().await;
            }
            debug!("scheduler loop stopped");
        });
    }

    /// Admit batches while headroom exists; runs only from the tick loop
    async fn run_admissions(self: &Arc<Self>) {
        loop {
            let Some(id) = self.scheduler.admit_next() else {
                break;
            };

            let admitted = {
                let mut batches = self.batches.write().await;
                match batches.get_mut(&id) {
                    Some(state) if state.record.status == BatchStatus::Queued => {
                        state.record.status = BatchStatus::Processing;
                        state.record.started_at = Some(Utc::now());
                        state.deadline = Some(Instant::now() + state.timeout);
                        true
                    }
                    // Cancelled while queued, or unknown: give the slot back
                    _ => false,
                }
            };

            if !admitted {
                self.scheduler.release();
                continue;
            }

            info!(batch_id = %id, "batch admitted");
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.dispatch_batch(id).await;
            });
        }
    }

    /// Dispatch every sub-request of an admitted batch under the local and
    /// global gates, then finalize
    async fn dispatch_batch(self: Arc<Self>, id: String) {
        let (requests, concurrency) = {
            let batches = self.batches.read().await;
            match batches.get(&id) {
                Some(state) => (Arc::clone(&state.requests), state.record.concurrency),
                None => return,
            }
        };

        let local_gate = ConcurrencyGate::new(concurrency);
        let mut handles = Vec::new();

        for request in requests.iter() {
            let local_permit = match local_gate.acquire().await {
                Ok(permit) => permit,
                Err(error) => {
                    error!(batch_id = %id, %error, "local gate failed");
                    break;
                }
            };
            let global_permit = match self.global_gate.acquire().await {
                Ok(permit) => permit,
                Err(error) => {
                    error!(batch_id = %id, %error, "global gate failed");
                    break;
                }
            };

            // Checked after acquiring permits: with a serial gate this is
            // what guarantees fail-fast stops dispatch after a settled
            // failure rather than racing it
            if self.dispatch_should_stop(&id).await {
                break;
            }

            let engine = Arc::clone(&self);
            let batch_id = id.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                // Permits are held for the whole resolution, retries and
                // backoff sleeps included
                let _local = local_permit;
                let _global = global_permit;
                let result = engine.resolver.resolve(&request).await;
                engine.record_outcome(&batch_id, result).await;
            }));
        }

        for joined in futures::future::join_all(handles).await {
            if let Err(error) = joined {
                error!(batch_id = %id, %error, "sub-request task panicked");
            }
        }

        self.finalize_batch(&id).await;
    }

    /// Whether the dispatch loop must stop admitting new sub-requests
    async fn dispatch_should_stop(&self, id: &str) -> bool {
        let mut batches = self.batches.write().await;
        let Some(state) = batches.get_mut(id) else {
            return true;
        };
        if state.record.status != BatchStatus::Processing || state.halt {
            return true;
        }
        if let Some(deadline) = state.deadline {
            if Instant::now() >= deadline {
                state.halt = true;
                state.timed_out = true;
                warn!(batch_id = %id, "batch deadline exceeded, stopping dispatch");
                return true;
            }
        }
        false
    }

    /// Record a settled sub-request outcome and update progress counters
    async fn record_outcome(&self, id: &str, result: SubResult) {
        if result.attempts > 1 {
            self.stats
                .retries
                .fetch_add((result.attempts - 1) as u64, Ordering::Relaxed);
        }

        let mut batches = self.batches.write().await;
        let Some(state) = batches.get_mut(id) else {
            return;
        };

        // A settle past the deadline means the batch was still in flight
        // when its timeout elapsed; the timeout must finalize the batch even
        // if no further dispatch ever re-checks the deadline
        if let Some(deadline) = state.deadline {
            if Instant::now() >= deadline && !state.timed_out {
                state.halt = true;
                state.timed_out = true;
                warn!(batch_id = %id, "sub-request settled past the batch deadline");
            }
        }

        if result.is_success() {
            state.record.progress.completed += 1;
            self.stats
                .subrequests_completed
                .fetch_add(1, Ordering::Relaxed);
        } else {
            state.record.progress.failed += 1;
            self.stats
                .subrequests_failed
                .fetch_add(1, Ordering::Relaxed);
            if let Some(error) = &result.error {
                let position = state
                    .record
                    .errors
                    .partition_point(|recorded| recorded.index < error.index);
                state.record.errors.insert(position, error.clone());
            }
            if !state.record.continue_on_error {
                state.halt = true;
            }
        }

        // Keep results ordered by the original sub-request index
        let position = state
            .record
            .results
            .partition_point(|recorded| recorded.index < result.index);
        state.record.results.insert(position, result);
    }

    /// Compute final status and statistics, persist the snapshot, release
    /// the scheduler slot
    async fn finalize_batch(&self, id: &str) {
        let record = {
            let mut batches = self.batches.write().await;
            let Some(state) = batches.get_mut(id) else {
                self.scheduler.release();
                return;
            };

            let final_status = if state.record.status == BatchStatus::Cancelled {
                BatchStatus::Cancelled
            } else if state.timed_out {
                state.record.reason =
                    Some(format!("timed out after {}s", state.record.timeout_secs));
                BatchStatus::Failed
            } else if state.record.progress.failed > 0 && !state.record.continue_on_error {
                state.record.reason = Some("sub-request failed".to_string());
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };

            if state.record.status.can_transition_to(final_status) {
                state.record.status = final_status;
            }
            state.record.completed_at = Some(Utc::now());
            state.record.statistics = Some(compute_statistics(&state.record));

            // Counters must be bumped before the terminal status becomes
            // visible to readers, so a statistics call right after a status
            // poll is never stale
            let counter = match state.record.status {
                BatchStatus::Completed => &self.stats.batches_completed,
                BatchStatus::Failed => &self.stats.batches_failed,
                _ => &self.stats.batches_cancelled,
            };
            counter.fetch_add(1, Ordering::Relaxed);

            state.record.clone()
        };

        self.persist(&record).await;
        self.scheduler.release();
        self.wake.notify_one();

        info!(
            batch_id = %id,
            status = ?record.status,
            completed = record.progress.completed,
            failed = record.progress.failed,
            "batch finalized"
        );
    }

    /// Best-effort persistence; failures degrade to in-memory operation
    async fn persist(&self, record: &BatchRecord) {
        if let Some(store) = &self.store {
            if let Err(error) = store.save(record).await {
                warn!(
                    batch_id = %record.id,
                    %error,
                    "failed to persist batch, continuing in memory"
                );
            }
        }
    }
}

fn compute_statistics(record: &BatchRecord) -> BatchStatistics {
    let settled = record.results.len() as u32;
    let cache_hits = record.results.iter().filter(|result| result.cached).count() as u32;
    let avg_duration_ms = if settled > 0 {
        record
            .results
            .iter()
            .map(|result| result.duration_ms)
            .sum::<u64>()
            / settled as u64
    } else {
        0
    };
    let success_rate = if settled > 0 {
        record.progress.completed as f64 / settled as f64
    } else {
        0.0
    };

    BatchStatistics {
        total: record.progress.total,
        succeeded: record.progress.completed,
        failed: record.progress.failed,
        cache_hits,
        avg_duration_ms,
        success_rate,
    }
}
