//! Error classification and retry backoff
//!
//! The external executor fails in heterogeneous ways: transport status
//! codes, network-level errors, provider-reported error bodies. A single
//! [`classify`] call at the executor boundary collapses all of them into a
//! [`ClassifiedError`]; everything downstream operates only on the tagged
//! form. Unknown errors are not retried.

use crate::config::RetryConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Status codes that are always retryable regardless of range
const RETRYABLE_STATUS: [u16; 5] = [429, 408, 502, 503, 504];

/// 5xx codes that indicate a permanent condition
const PERMANENT_5XX: [u16; 3] = [501, 505, 507];

/// Provider-reported error types considered transient
static RETRYABLE_ERROR_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "rate_limit",
        "rate_limited",
        "overloaded",
        "temporary_failure",
        "server_busy",
    ])
});

/// Network-level failure kinds reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection reset by peer
    ConnectionReset,
    /// Connection refused
    ConnectionRefused,
    /// Socket-level timeout
    TimedOut,
    /// Name resolution failure
    DnsFailure,
}

/// Failure surface of the external executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Transport-level response with a status code
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Network-level failure before a response arrived
    #[error("Network error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// The call exceeded its deadline
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Provider-reported structured error body
    #[error("Provider error ({error_type}): {message}")]
    Provider { error_type: String, message: String },

    /// Anything the executor could not shape further
    #[error("{0}")]
    Other(String),
}

/// An executor failure tagged with its retry classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Stable error code for reporting
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Whether the retry policy may try again
    pub retryable: bool,
    /// Transport status code, when the failure carried one
    pub status: Option<u16>,
}

/// Classify an executor failure into the bounded taxonomy.
///
/// Rules, in priority order: explicit retryable status codes; remaining 5xx
/// minus the permanent denylist; remaining 4xx terminal; network errors
/// retryable; retryable provider error vocabulary; everything else terminal.
pub fn classify(error: &ExecutorError) -> ClassifiedError {
    match error {
        ExecutorError::Http { status, message } => {
            let (code, retryable) = classify_status(*status);
            ClassifiedError {
                code: code.to_string(),
                message: message.clone(),
                retryable,
                status: Some(*status),
            }
        }
        ExecutorError::Network { kind, message } => ClassifiedError {
            code: match kind {
                NetworkErrorKind::ConnectionReset => "connection_reset",
                NetworkErrorKind::ConnectionRefused => "connection_refused",
                NetworkErrorKind::TimedOut => "network_timeout",
                NetworkErrorKind::DnsFailure => "dns_failure",
            }
            .to_string(),
            message: message.clone(),
            retryable: true,
            status: None,
        },
        ExecutorError::Timeout(message) => ClassifiedError {
            code: "timeout".to_string(),
            message: message.clone(),
            retryable: true,
            status: None,
        },
        ExecutorError::Provider {
            error_type,
            message,
        } => {
            let normalized = normalize_error_type(error_type);
            ClassifiedError {
                code: normalized.clone(),
                message: message.clone(),
                retryable: RETRYABLE_ERROR_TYPES.contains(normalized.as_str()),
                status: None,
            }
        }
        ExecutorError::Other(message) => ClassifiedError {
            code: "unknown".to_string(),
            message: message.clone(),
            retryable: false,
            status: None,
        },
    }
}

fn classify_status(status: u16) -> (&'static str, bool) {
    if RETRYABLE_STATUS.contains(&status) {
        let code = match status {
            429 => "rate_limit",
            408 => "request_timeout",
            _ => "server_error",
        };
        return (code, true);
    }
    match status {
        500..=599 if !PERMANENT_5XX.contains(&status) => ("server_error", true),
        500..=599 => ("server_error_permanent", false),
        401 | 403 => ("auth_error", false),
        404 => ("not_found", false),
        400..=499 => ("invalid_request", false),
        _ => ("unknown", false),
    }
}

/// Lowercase and strip a trailing `_error` so provider vocabularies like
/// `rate_limit_error` match the retryable set
fn normalize_error_type(error_type: &str) -> String {
    let lowered = error_type.trim().to_ascii_lowercase();
    lowered
        .strip_suffix("_error")
        .unwrap_or(&lowered)
        .to_string()
}

/// Exponential backoff with a delay cap and bounded jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from its configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Maximum total attempts per sub-request, initial call included
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Whether the policy allows another attempt for this error
    pub fn is_retryable(&self, error: &ClassifiedError) -> bool {
        error.retryable
    }

    /// Delay before the next attempt. `attempt` is 1-indexed for the first
    /// retry: `delay = min(base * multiplier^(attempt-1), max_delay)` plus
    /// up to 10% uniform jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let exponent = (attempt - 1).min(63) as i32;
        let raw = (self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent))
            .min(self.config.max_delay_ms as f64);

        let jitter = if self.config.jitter {
            raw * 0.1 * rand::random::<f64>()
        } else {
            0.0
        };

        Duration::from_millis((raw + jitter) as u64)
    }
}
