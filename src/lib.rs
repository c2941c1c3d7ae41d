//! # Batchgate
//!
//! Batch scheduling and resilient-execution engine for AI inference
//! traffic. Callers submit batches of inference payloads; the engine
//! admits them through prioritized FIFO lanes, bounds execution with
//! global and per-batch concurrency gates, retries transient failures
//! with exponential backoff, memoizes results by content fingerprint,
//! and exposes the full batch lifecycle (status, results, cancellation,
//! statistics).
//!
//! ## Quick start
//!
//! ```no_run
//! use batchgate::{BatchEngine, BatchSpec, EngineConfig, InferenceExecutor};
//! use batchgate::ExecutorError;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct MyExecutor;
//!
//! #[async_trait]
//! impl InferenceExecutor for MyExecutor {
//!     async fn call(
//!         &self,
//!         payload: &serde_json::Value,
//!         _timeout: Duration,
//!     ) -> Result<serde_json::Value, ExecutorError> {
//!         // forward to a provider
//!         Ok(serde_json::json!({"echo": payload}))
//!     }
//! }
//!
//! # async fn run() -> batchgate::Result<()> {
//! let engine = BatchEngine::new(EngineConfig::default(), Arc::new(MyExecutor), None);
//! let record = engine
//!     .submit(BatchSpec {
//!         id: None,
//!         owner: "tenant-1".to_string(),
//!         requests: vec![serde_json::json!({"model": "gpt-4", "prompt": "hi"})],
//!         priority: None,
//!         concurrency: None,
//!         timeout_secs: None,
//!         continue_on_error: true,
//!     })
//!     .await?;
//! let status = engine.status(&record.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod storage;
pub mod utils;

pub use config::{CacheConfig, EngineConfig, LimitsConfig, RetryConfig, SchedulerConfig};
pub use core::cache::{CacheStats, ResultCache};
pub use core::engine::BatchEngine;
pub use core::executor::{InferenceExecutor, RequestExecutor};
pub use core::gate::{ConcurrencyGate, GatePermit};
pub use core::retry::{classify, ClassifiedError, ExecutorError, NetworkErrorKind, RetryPolicy};
pub use core::stats::EngineStatistics;
pub use core::types::{
    BatchPriority, BatchProgress, BatchRecord, BatchResults, BatchSpec, BatchStatistics,
    BatchStatus, BatchSummary, ResultsQuery, SubError, SubRequest, SubResult,
};
pub use storage::{BatchStore, MemoryStore};
pub use utils::error::{EngineError, Result};
pub use utils::logging::init_logging;
