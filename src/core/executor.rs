//! Sub-request resolution: cache, executor call, classified retries
//!
//! [`RequestExecutor::resolve`] never raises past its own boundary. Every
//! failure is folded into the returned [`SubResult`], so the dispatch loop
//! has no special case for a sub-request that "throws".

use crate::core::cache::ResultCache;
use crate::core::retry::{classify, ExecutorError, RetryPolicy};
use crate::core::types::{SubError, SubRequest, SubResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The external capability that performs the actual inference call.
///
/// The engine treats it as an opaque, possibly slow, possibly failing
/// function; routing, transport, and model selection live behind it.
#[async_trait]
pub trait InferenceExecutor: Send + Sync {
    /// Perform one inference call within the given timeout
    async fn call(
        &self,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, ExecutorError>;
}

/// Orchestrates one sub-request: cache lookup, executor call under the retry
/// policy, memoization of successes
pub struct RequestExecutor {
    executor: Arc<dyn InferenceExecutor>,
    cache: Arc<ResultCache>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl RequestExecutor {
    /// Wire the resolution pipeline together
    pub fn new(
        executor: Arc<dyn InferenceExecutor>,
        cache: Arc<ResultCache>,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            cache,
            policy,
            request_timeout,
        }
    }

    /// Resolve one sub-request to a settled outcome.
    ///
    /// The caller is expected to hold its concurrency permits for the whole
    /// call, retries and backoff sleeps included, so admission accounting
    /// stays accurate.
    pub async fn resolve(&self, request: &SubRequest) -> SubResult {
        let start = Instant::now();
        let fingerprint = request.fingerprint();

        if let Some(output) = self.cache.get(&fingerprint) {
            debug!(index = request.index, "cache hit");
            return SubResult {
                index: request.index,
                output: Some(output),
                error: None,
                cached: true,
                attempts: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                completed_at: Utc::now(),
            };
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(
                self.request_timeout,
                self.executor.call(&request.payload, self.request_timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout(format!(
                    "no response within {:?}",
                    self.request_timeout
                ))),
            };

            match outcome {
                Ok(output) => {
                    self.cache.put(fingerprint, output.clone());
                    if attempt > 1 {
                        debug!(index = request.index, attempt, "retry succeeded");
                    }
                    return SubResult {
                        index: request.index,
                        output: Some(output),
                        error: None,
                        cached: false,
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                        completed_at: Utc::now(),
                    };
                }
                Err(error) => {
                    let classified = classify(&error);
                    if classified.retryable && attempt < self.policy.max_attempts() {
                        let delay = self.policy.next_delay(attempt);
                        debug!(
                            index = request.index,
                            attempt,
                            code = %classified.code,
                            delay_ms = delay.as_millis() as u64,
                            "retryable failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!(
                        index = request.index,
                        attempt,
                        code = %classified.code,
                        retryable = classified.retryable,
                        "sub-request failed"
                    );
                    return SubResult {
                        index: request.index,
                        output: None,
                        error: Some(SubError {
                            index: request.index,
                            code: classified.code,
                            message: classified.message,
                            retryable: classified.retryable,
                            status: classified.status,
                        }),
                        cached: false,
                        attempts: attempt,
                        duration_ms: start.elapsed().as_millis() as u64,
                        completed_at: Utc::now(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, RetryConfig};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Executor that pops scripted errors before succeeding
    struct ScriptedExecutor {
        errors: Mutex<VecDeque<ExecutorError>>,
        calls: AtomicU64,
    }

    impl ScriptedExecutor {
        fn new(errors: Vec<ExecutorError>) -> Self {
            Self {
                errors: Mutex::new(errors.into()),
                calls: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceExecutor for ScriptedExecutor {
        async fn call(
            &self,
            payload: &serde_json::Value,
            _timeout: Duration,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.errors.lock().pop_front() {
                return Err(error);
            }
            Ok(json!({"echo": payload.clone()}))
        }
    }

    fn request_executor(
        executor: Arc<ScriptedExecutor>,
        max_attempts: u32,
    ) -> (RequestExecutor, Arc<ResultCache>) {
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_ms: 5,
            multiplier: 2.0,
            max_delay_ms: 50,
            jitter: false,
        });
        (
            RequestExecutor::new(
                executor,
                Arc::clone(&cache),
                policy,
                Duration::from_secs(5),
            ),
            cache,
        )
    }

    fn sub_request(index: usize) -> SubRequest {
        SubRequest {
            index,
            payload: json!({"model": "test-model", "prompt": format!("p{index}")}),
        }
    }

    #[tokio::test]
    async fn test_resolve_success_populates_cache() {
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let (resolver, cache) = request_executor(Arc::clone(&executor), 3);
        let request = sub_request(0);

        let result = resolver.resolve(&request).await;
        assert!(result.is_success());
        assert!(!result.cached);
        assert_eq!(result.attempts, 1);
        assert!(cache.get(&request.fingerprint()).is_some());
    }

    #[tokio::test]
    async fn test_resolve_cache_hit_skips_executor() {
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let (resolver, _cache) = request_executor(Arc::clone(&executor), 3);
        let request = sub_request(0);

        resolver.resolve(&request).await;
        let second = resolver.resolve(&request).await;

        assert!(second.cached);
        assert_eq!(second.attempts, 0);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_retries_transient_then_succeeds() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            ExecutorError::Http {
                status: 503,
                message: "overloaded".to_string(),
            },
            ExecutorError::Http {
                status: 503,
                message: "overloaded".to_string(),
            },
        ]));
        let (resolver, _cache) = request_executor(Arc::clone(&executor), 4);

        let result = resolver.resolve(&sub_request(1)).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn test_resolve_terminal_error_does_not_retry() {
        let executor = Arc::new(ScriptedExecutor::new(vec![ExecutorError::Http {
            status: 400,
            message: "bad request".to_string(),
        }]));
        let (resolver, _cache) = request_executor(Arc::clone(&executor), 4);

        let result = resolver.resolve(&sub_request(2)).await;
        assert!(!result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(executor.calls(), 1);

        let error = result.error.unwrap();
        assert_eq!(error.code, "invalid_request");
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_resolve_exhausts_retries() {
        let mut errors = Vec::new();
        for _ in 0..5 {
            errors.push(ExecutorError::Http {
                status: 503,
                message: "still down".to_string(),
            });
        }
        let executor = Arc::new(ScriptedExecutor::new(errors));
        let (resolver, _cache) = request_executor(Arc::clone(&executor), 3);

        let result = resolver.resolve(&sub_request(3)).await;
        assert!(!result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(executor.calls(), 3);
        assert!(result.error.unwrap().retryable);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_not_cached() {
        let executor = Arc::new(ScriptedExecutor::new(vec![ExecutorError::Other(
            "mystery".to_string(),
        )]));
        let (resolver, cache) = request_executor(Arc::clone(&executor), 3);
        let request = sub_request(4);

        let result = resolver.resolve(&request).await;
        assert!(!result.is_success());
        assert!(cache.get(&request.fingerprint()).is_none());
    }

    /// Slow executor for exercising the per-call timeout
    struct SlowExecutor;

    #[async_trait]
    impl InferenceExecutor for SlowExecutor {
        async fn call(
            &self,
            _payload: &serde_json::Value,
            _timeout: Duration,
        ) -> std::result::Result<serde_json::Value, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        }
    }

    #[tokio::test]
    async fn test_resolve_call_timeout_is_classified_retryable() {
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            base_delay_ms: 5,
            multiplier: 2.0,
            max_delay_ms: 50,
            jitter: false,
        });
        let resolver = RequestExecutor::new(
            Arc::new(SlowExecutor),
            cache,
            policy,
            Duration::from_millis(20),
        );

        let result = resolver.resolve(&sub_request(5)).await;
        assert!(!result.is_success());
        let error = result.error.unwrap();
        assert_eq!(error.code, "timeout");
        assert!(error.retryable);
    }
}
