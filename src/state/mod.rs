//! State module for tracking harvest progress
//!
//! This module provides the in-memory state of a harvest run.
//!
//! # Components
//!
//! - `RunState`: The orchestrator's state machine (init, replay, process, advance, done, failed)
//! - `Deduplicator`: The set of identities already admitted or persisted
//! - `RunSummary`: Counters reported when the run ends, plus its `ExitReason`

mod dedup;
mod run_state;
mod summary;

// Re-export main types
pub use dedup::Deduplicator;
pub use run_state::RunState;
pub use summary::{ExitReason, RunSummary};
