//! Checkpoint storage traits and error types
//!
//! This module defines the checkpoint record, the trait interface for
//! checkpoint backends and the associated error types.

use crate::extract::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint page went backwards: last saved {last_saved}, attempted {attempted}")]
    NonMonotonic { last_saved: u32, attempted: u32 },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable record of completed work
///
/// `last_page = k` means pages `1..=k` have been flushed to the output and
/// every identity admitted on them is in `processed_identities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub last_page: u32,

    pub processed_identities: BTreeSet<Identity>,

    /// Fingerprint of the configuration that produced this checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(last_page: u32, processed_identities: BTreeSet<Identity>) -> Self {
        Self {
            last_page,
            processed_identities,
            fingerprint: None,
            saved_at: None,
        }
    }

    /// Returns true for the zero value (nothing processed yet)
    pub fn is_empty(&self) -> bool {
        self.last_page == 0 && self.processed_identities.is_empty()
    }
}

/// Trait for checkpoint backend implementations
///
/// Saves must be atomic: a crash during `save` leaves the previous checkpoint
/// readable.
pub trait CheckpointStore: Send {
    /// Loads the saved checkpoint
    ///
    /// Returns the zero value when nothing usable has been saved. Unreadable
    /// data is logged and treated as absent.
    fn load(&mut self) -> StorageResult<Checkpoint>;

    /// Replaces the saved checkpoint
    ///
    /// # Errors
    ///
    /// * `StorageError::NonMonotonic` - `last_page` is lower than the last page saved by this store
    /// * `StorageError::Io` - The checkpoint could not be written durably
    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()>;

    /// Removes the saved checkpoint; a no-op when none exists
    fn clear(&mut self) -> StorageResult<()>;
}
