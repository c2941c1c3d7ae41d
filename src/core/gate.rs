//! Counting semaphore bounding simultaneous in-flight work
//!
//! One gate is shared by the whole engine; each admitted batch gets its own
//! local gate on top. Permits are owned RAII values, so release happens on
//! every exit path, cancellation and panics included. Waiters are served in
//! arrival order.

use crate::utils::error::{EngineError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded concurrency gate with FIFO waiters
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// An acquired permit; dropping it releases the slot and wakes one waiter
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate with the given capacity, clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a slot is free and claim it.
    ///
    /// The returned permit must be held for the full unit of work it covers;
    /// it is released exactly once, when dropped.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("concurrency gate closed".to_string()))?;
        Ok(GatePermit { _permit: permit })
    }

    /// Number of currently free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
