//! Output sink traits and types
//!
//! This module defines the trait interface for output destinations, the
//! fixed record schema and the associated error types.

use crate::extract::{EnrichedItem, Identity};
use thiserror::Error;

/// Name of the first column of every record
pub const IDENTITY_COLUMN: &str = "identity";

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Existing output has columns [{}], expected [{}]", found.join(", "), expected.join(", "))]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Fixed column order of output records
///
/// The identity column always comes first, followed by the configured columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    columns: Vec<String>,
}

impl RecordSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec![IDENTITY_COLUMN.to_string()];
        all.extend(
            columns
                .into_iter()
                .map(Into::into)
                .filter(|c: &String| c != IDENTITY_COLUMN),
        );
        Self { columns: all }
    }

    /// All columns, identity first
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Renders one item in column order, using `placeholder` for missing fields
    pub fn row<'a>(&'a self, item: &'a EnrichedItem, placeholder: &'a str) -> Vec<&'a str> {
        self.columns
            .iter()
            .map(|column| {
                if column == IDENTITY_COLUMN {
                    item.identity().as_str()
                } else {
                    item.field(column).render(placeholder)
                }
            })
            .collect()
    }
}

/// Trait for append-only output destinations
pub trait OutputSink: Send {
    /// Column order shared by every record
    fn schema(&self) -> &RecordSchema;

    /// Appends one page's worth of items and makes them durable
    fn append_batch(&mut self, items: &[EnrichedItem]) -> OutputResult<()>;

    /// Identities of every record already in the destination
    fn existing_identities(&mut self) -> OutputResult<Vec<Identity>>;
}
