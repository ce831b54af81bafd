//! SQLite output sink
//!
//! Records go to a `records` table whose columns follow the record schema,
//! plus a `harvested_at` timestamp. Each batch is inserted in one transaction.

use crate::extract::{EnrichedItem, Identity};
use crate::output::traits::{OutputError, OutputResult, OutputSink, RecordSchema};
use chrono::Utc;
use rusqlite::{params_from_iter, Connection};
use std::fs;
use std::path::Path;

/// Name of the output table
const RECORDS_TABLE: &str = "records";

/// Column holding the insertion timestamp
const HARVESTED_AT_COLUMN: &str = "harvested_at";

/// SQLite-based output sink
pub struct SqliteSink {
    conn: Connection,
    schema: RecordSchema,
    placeholder: String,
    insert_sql: String,
}

impl SqliteSink {
    /// Opens or creates the output database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `schema` - Column order
    /// * `placeholder` - Written for missing fields
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Ready to append
    /// * `Err(OutputError)` - Failed to open the database, or the existing table has other columns
    pub fn open(
        path: &Path,
        schema: RecordSchema,
        placeholder: impl Into<String>,
    ) -> OutputResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Configure SQLite for durable appends
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
        ",
        )?;

        Self::with_connection(conn, schema, placeholder.into())
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory(schema: RecordSchema) -> OutputResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, schema, "N/A".to_string())
    }

    fn with_connection(
        conn: Connection,
        schema: RecordSchema,
        placeholder: String,
    ) -> OutputResult<Self> {
        let mut expected: Vec<String> = schema.columns().to_vec();
        expected.push(HARVESTED_AT_COLUMN.to_string());

        let found = table_columns(&conn)?;
        if found.is_empty() {
            conn.execute_batch(&create_table_sql(schema.columns()))?;
            tracing::info!("Created table '{}'", RECORDS_TABLE);
        } else if found != expected {
            return Err(OutputError::SchemaMismatch { expected, found });
        }

        let names: Vec<String> = expected.iter().map(|c| quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=expected.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            RECORDS_TABLE,
            names.join(", "),
            placeholders.join(", ")
        );

        Ok(Self {
            conn,
            schema,
            placeholder,
            insert_sql,
        })
    }
}

impl OutputSink for SqliteSink {
    fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    fn append_batch(&mut self, items: &[EnrichedItem]) -> OutputResult<()> {
        let harvested_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&self.insert_sql)?;
            for item in items {
                let mut values = self.schema.row(item, &self.placeholder);
                values.push(harvested_at.as_str());
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        tracing::debug!("Inserted {} records", items.len());
        Ok(())
    }

    fn existing_identities(&mut self) -> OutputResult<Vec<Identity>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT identity FROM {} ORDER BY rowid", RECORDS_TABLE))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut identities = Vec::new();
        for row in rows {
            identities.push(Identity::new(row?));
        }
        Ok(identities)
    }
}

/// Column names of the records table, empty if it does not exist
fn table_columns(conn: &Connection) -> OutputResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", RECORDS_TABLE))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

fn create_table_sql(columns: &[String]) -> String {
    let mut definitions = Vec::with_capacity(columns.len() + 1);
    for column in columns {
        if column == crate::output::traits::IDENTITY_COLUMN {
            definitions.push(format!("{} TEXT PRIMARY KEY", quote_identifier(column)));
        } else {
            definitions.push(format!("{} TEXT NOT NULL", quote_identifier(column)));
        }
    }
    definitions.push(format!("{} TEXT NOT NULL", HARVESTED_AT_COLUMN));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        RECORDS_TABLE,
        definitions.join(",\n    ")
    )
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DetailFields, FieldValue, RawItem};
    use tempfile::TempDir;

    fn item(id: &str, rating: Option<&str>) -> EnrichedItem {
        EnrichedItem::new(
            RawItem::new(Identity::new(format!("https://example.com/firm/{}", id)))
                .with_field("rating", FieldValue::from(rating.map(str::to_string))),
            DetailFields::new(),
        )
    }

    fn schema() -> RecordSchema {
        RecordSchema::new(["rating", "work hours"])
    }

    #[test]
    fn test_append_and_read_back() {
        let mut sink = SqliteSink::new_in_memory(schema()).unwrap();
        sink.append_batch(&[item("1", Some("4.5")), item("2", None)]).unwrap();

        let ids = sink.existing_identities().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].as_str(), "https://example.com/firm/1");

        let rating: String = sink
            .conn
            .query_row(
                "SELECT rating FROM records WHERE identity = ?1",
                ["https://example.com/firm/2"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rating, "N/A");
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        let mut sink = SqliteSink::open(&path, schema(), "N/A").unwrap();
        sink.append_batch(&[item("1", Some("5"))]).unwrap();
        drop(sink);

        let mut sink = SqliteSink::open(&path, schema(), "N/A").unwrap();
        sink.append_batch(&[item("2", Some("3"))]).unwrap();
        assert_eq!(sink.existing_identities().unwrap().len(), 2);
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        SqliteSink::open(&path, schema(), "N/A").unwrap();
        let result = SqliteSink::open(&path, RecordSchema::new(["title"]), "N/A");
        assert!(matches!(result, Err(OutputError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("work hours"), "\"work hours\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
