//! Error types for the batch engine

use thiserror::Error;

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the engine's public surface.
///
/// Sub-request failures never appear here: they are classified at the
/// executor boundary and surfaced as data inside batch results.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Batch submission rejected (empty, oversized, malformed payloads)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown batch id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the batch's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Store failures surfaced to callers of explicit storage operations
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),
}
