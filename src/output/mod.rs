//! Output module for persisting harvested records
//!
//! This module handles:
//! - The append-only `OutputSink` trait and its fixed `RecordSchema`
//! - Delimited text output (CSV, TSV, custom delimiter)
//! - SQLite output
//! - Displaying run summaries

mod delimited;
mod sqlite_output;
pub mod stats;
mod traits;

pub use delimited::DelimitedSink;
pub use sqlite_output::SqliteSink;
pub use stats::{format_summary, print_checkpoint, print_summary};
pub use traits::{OutputError, OutputResult, OutputSink, RecordSchema, IDENTITY_COLUMN};

use crate::config::{OutputConfig, OutputFormat};

/// Opens the output destination described by the `[output]` section
///
/// # Arguments
///
/// * `config` - The output configuration
///
/// # Returns
///
/// * `Ok(Box<dyn OutputSink>)` - Sink ready to append
/// * `Err(OutputError)` - Failed to open or create the destination
pub fn open_sink(config: &OutputConfig) -> OutputResult<Box<dyn OutputSink>> {
    let schema = RecordSchema::new(config.columns.iter().cloned());

    match config.format {
        OutputFormat::Csv | OutputFormat::Tsv => Ok(Box::new(DelimitedSink::open(
            &config.path,
            config.delimiter_byte(),
            schema,
            config.placeholder.clone(),
        )?)),
        OutputFormat::Sqlite => Ok(Box::new(SqliteSink::open(
            &config.path,
            schema,
            config.placeholder.clone(),
        )?)),
    }
}
