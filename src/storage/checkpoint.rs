//! JSON checkpoint file
//!
//! The checkpoint is a small JSON document rewritten after every page. Writes
//! go to a temporary file in the same directory which is synced and then
//! renamed over the old checkpoint.

use crate::storage::traits::{Checkpoint, CheckpointStore, StorageError, StorageResult};
use chrono::Utc;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Checkpoint store backed by a JSON file
pub struct JsonCheckpointStore {
    path: PathBuf,
    fingerprint: Option<String>,
    last_saved: Option<u32>,
}

impl JsonCheckpointStore {
    /// Creates a store for the checkpoint at `path`
    ///
    /// Nothing is read or written until `load` or `save` is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fingerprint: None,
            last_saved: None,
        }
    }

    /// Ties the store to a configuration fingerprint
    ///
    /// Saved checkpoints are stamped with it, and checkpoints stamped with a
    /// different fingerprint are ignored on load.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the checkpoint file without any recovery
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Checkpoint))` - The file exists and parsed
    /// * `Ok(None)` - No checkpoint file exists
    /// * `Err(StorageError)` - The file could not be read or parsed
    pub fn read(&self) -> StorageResult<Option<Checkpoint>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&mut self) -> StorageResult<Checkpoint> {
        let checkpoint = match self.read() {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                tracing::debug!("No checkpoint at {}", self.path.display());
                return Ok(Checkpoint::default());
            }
            Err(e) => {
                tracing::error!(
                    "Ignoring unreadable checkpoint {}: {}",
                    self.path.display(),
                    e
                );
                return Ok(Checkpoint::default());
            }
        };

        if let (Some(expected), Some(found)) = (&self.fingerprint, &checkpoint.fingerprint) {
            if expected != found {
                tracing::warn!(
                    "Checkpoint {} was written for a different configuration, starting from page 1",
                    self.path.display()
                );
                return Ok(Checkpoint::default());
            }
        }

        // Later saves may not go below the loaded page
        self.last_saved = Some(self.last_saved.unwrap_or(0).max(checkpoint.last_page));
        tracing::info!(
            "Loaded checkpoint: {} pages done, {} identities",
            checkpoint.last_page,
            checkpoint.processed_identities.len()
        );
        Ok(checkpoint)
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> StorageResult<()> {
        if let Some(last_saved) = self.last_saved {
            if checkpoint.last_page < last_saved {
                return Err(StorageError::NonMonotonic {
                    last_saved,
                    attempted: checkpoint.last_page,
                });
            }
        }

        let mut record = checkpoint.clone();
        if record.fingerprint.is_none() {
            record.fingerprint = self.fingerprint.clone();
        }
        record.saved_at = Some(Utc::now());

        let directory = self.directory();
        fs::create_dir_all(directory)?;

        let mut temp = NamedTempFile::new_in(directory)?;
        serde_json::to_writer_pretty(temp.as_file_mut(), &record)?;
        temp.as_file_mut().write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;

        self.last_saved = Some(checkpoint.last_page);
        tracing::debug!(
            "Checkpoint saved: page {}, {} identities",
            checkpoint.last_page,
            checkpoint.processed_identities.len()
        );
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Removed checkpoint {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
