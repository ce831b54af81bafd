//! Storage module for persisting harvest progress
//!
//! This module handles the checkpoint that makes a harvest resumable:
//! - The `Checkpoint` record (last flushed page + processed identities)
//! - The `CheckpointStore` trait
//! - `JsonCheckpointStore`, an atomically replaced JSON file

mod checkpoint;
mod traits;

pub use checkpoint::JsonCheckpointStore;
pub use traits::{Checkpoint, CheckpointStore, StorageError, StorageResult};
