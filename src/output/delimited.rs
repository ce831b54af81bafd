//! Delimited text output (CSV, TSV or a custom delimiter)

use crate::extract::{EnrichedItem, Identity};
use crate::output::traits::{OutputError, OutputResult, OutputSink, RecordSchema};
use csv::{ReaderBuilder, Writer, WriterBuilder};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Appends records to a delimited text file
///
/// The header row is written only when the file is created. Reopening an
/// existing file checks its header against the schema.
pub struct DelimitedSink {
    path: PathBuf,
    delimiter: u8,
    schema: RecordSchema,
    placeholder: String,
    writer: Writer<File>,
}

impl DelimitedSink {
    /// Opens `path` for appending, creating it with a header row if needed
    ///
    /// # Arguments
    ///
    /// * `path` - Output file
    /// * `delimiter` - Field delimiter byte (e.g. `b','`, `b'\t'`, `b';'`)
    /// * `schema` - Column order
    /// * `placeholder` - Written for missing fields
    ///
    /// # Returns
    ///
    /// * `Ok(DelimitedSink)` - Ready to append
    /// * `Err(OutputError::SchemaMismatch)` - The existing header differs from `schema`
    pub fn open(
        path: impl Into<PathBuf>,
        delimiter: u8,
        schema: RecordSchema,
        placeholder: impl Into<String>,
    ) -> OutputResult<Self> {
        let path = path.into();
        let exists = fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        if exists {
            let found = read_header(&path, delimiter)?;
            if found != schema.columns() {
                return Err(OutputError::SchemaMismatch {
                    expected: schema.columns().to_vec(),
                    found,
                });
            }
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_writer(file);

        if !exists {
            writer.write_record(schema.columns())?;
            writer.flush()?;
            tracing::info!("Created output file {}", path.display());
        } else {
            tracing::info!("Appending to existing output file {}", path.display());
        }

        Ok(Self {
            path,
            delimiter,
            schema,
            placeholder: placeholder.into(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for DelimitedSink {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn append_batch(&mut self, items: &[EnrichedItem]) -> OutputResult<()> {
        for item in items {
            self.writer
                .write_record(self.schema.row(item, &self.placeholder))?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;

        tracing::debug!("Appended {} records to {}", items.len(), self.path.display());
        Ok(())
    }

    fn existing_identities(&mut self) -> OutputResult<Vec<Identity>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;

        let mut identities = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let Some(identity) = record.get(0).filter(|s| !s.is_empty()) {
                identities.push(Identity::new(identity));
            }
        }
        Ok(identities)
    }
}

fn read_header(path: &Path, delimiter: u8) -> OutputResult<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}
