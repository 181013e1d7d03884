//! CSV ingest.
//!
//! Uploaded files are parsed into a [`RawTable`] of trimmed strings. The
//! profiler infers column types from it, and the compute stage turns it into a
//! typed [`Table`] using the stored profile's schema.

use std::collections::HashSet;
use tally_plan::{DatasetSchema, Table};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unsupported file type: {0} (only CSV is accepted)")]
    Unsupported(String),

    #[error("File has no header row")]
    MissingHeader,

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Column mismatch: file has {file} columns, profile has {profile}")]
    SchemaMismatch { file: usize, profile: usize },
}

/// Header plus rows of raw cell text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cells of column `index`, with missing trailing cells as empty strings.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }

    /// Parse every cell against `schema`. Column order must match the header.
    pub fn into_table(self, schema: DatasetSchema) -> Result<Table, IngestError> {
        if schema.len() != self.headers.len() {
            return Err(IngestError::SchemaMismatch {
                file: self.headers.len(),
                profile: schema.len(),
            });
        }
        Ok(Table::from_text_rows(schema, self.rows))
    }
}

/// True if the filename looks like something [`parse_csv`] accepts.
pub fn is_supported(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    lower.ends_with(".csv") || lower.ends_with(".txt")
}

/// Parse an uploaded file. Only CSV is supported.
pub fn parse_upload(filename: &str, data: &[u8]) -> Result<RawTable, IngestError> {
    if !is_supported(filename) {
        return Err(IngestError::Unsupported(filename.to_string()));
    }
    parse_csv(data)
}

/// Parse CSV bytes with a header row. Rows may be ragged; blank lines are skipped.
pub fn parse_csv(data: &[u8]) -> Result<RawTable, IngestError> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(IngestError::MissingHeader);
    }

    let mut seen = HashSet::new();
    for header in &headers {
        if !seen.insert(header.as_str()) {
            return Err(IngestError::DuplicateColumn(header.clone()));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable { headers, rows })
}
