//! Harvest engine
//!
//! This module contains the core harvesting logic, including:
//! - Bounded retry with exponential backoff
//! - Pagination across listing pages with ordered fallback strategies
//! - Concurrent enrichment on the session pool
//! - Overall run coordination

mod batch;
mod coordinator;
mod pagination;
mod retry;

pub use batch::{BatchOutcome, BatchProcessor};
pub use coordinator::Coordinator;
pub use pagination::{PaginationController, PaginationState, PaginationStrategy};
pub use retry::{
    AttemptFuture, AttemptObserver, AttemptOutcome, RetryExecutor, RetryPolicy, Retryable,
    TracingObserver,
};
