//! Core engine modules

pub mod cache;
pub mod engine;
pub mod executor;
pub mod gate;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod types;
