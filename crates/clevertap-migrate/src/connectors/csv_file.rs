//! CSV file connector for profile and event imports.
//!
//! The first row is the header and must name at least one identity column.
//! Rows are bound to the shared header and interpreted by the CSV
//! transformer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connectors::{RecordSink, SourceConnector, SourceContext};
use crate::error::{Error, Result};
use crate::record::{CsvRow, RawRecord, IDENTITY_KEYS};

/// Configuration for CSV file import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvFileConfig {
    /// Path to the CSV file.
    pub path: PathBuf,
    /// Event name for event imports.
    #[serde(default)]
    pub event_name: Option<String>,
    /// Delimiter character.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

/// CSV file connector.
pub struct CsvFileConnector {
    config: CsvFileConfig,
}

impl CsvFileConnector {
    /// Creates a new CSV file connector.
    #[must_use]
    pub fn new(config: CsvFileConfig) -> Self {
        Self { config }
    }
}

/// Cleans header names and checks for an identity column.
///
/// # Errors
///
/// Returns [`Error::FatalSource`] when no identity column is present.
pub fn process_header<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
    let header: Vec<String> = names
        .into_iter()
        .map(|name| name.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    if !header.iter().any(|h| IDENTITY_KEYS.contains(&h.as_str())) {
        return Err(Error::FatalSource(
            "identity, objectId, FBID or GPID should be present".to_string(),
        ));
    }
    if !header.iter().any(|h| h == "ts") {
        info!("ts is missing. It will default to the current timestamp");
    }
    Ok(header)
}

enum Row {
    Record(CsvRow),
    Malformed(u64, String),
}

/// Reads `path` on the calling (blocking) thread, pushing rows into `tx`.
fn read_rows(path: &Path, delimiter: u8, tx: &mpsc::Sender<Result<Row>>) -> Result<()> {
    let file = File::open(path)
        .map_err(|e| Error::FatalSource(format!("Unable to open '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(file);

    let mut records = reader.records();
    let header = match records.next() {
        Some(Ok(record)) => process_header(record.iter())?,
        Some(Err(e)) => {
            return Err(Error::FatalSource(format!("Error in processing header: {e}")))
        }
        None => return Err(Error::FatalSource("CSV file is empty".to_string())),
    };
    let header = Arc::new(header);

    for record in records {
        let row = match record {
            Ok(record) => Row::Record(CsvRow {
                line: record.position().map_or(0, |p| p.line()),
                header: Arc::clone(&header),
                fields: record.iter().map(str::to_string).collect(),
            }),
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                Row::Malformed(line, e.to_string())
            }
        };
        if tx.blocking_send(Ok(row)).is_err() {
            break;
        }
    }
    Ok(())
}

#[async_trait]
impl SourceConnector for CsvFileConnector {
    fn source_type(&self) -> &'static str {
        "csv_file"
    }

    async fn stream(&mut self, ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        let delimiter = u8::try_from(self.config.delimiter)
            .map_err(|_| Error::Config("CSV delimiter must be a single byte".to_string()))?;
        let path = self.config.path.clone();
        info!(file = %path.display(), "Reading CSV file");

        let (tx, mut rx) = mpsc::channel(256);
        let reader = tokio::task::spawn_blocking(move || {
            if let Err(e) = read_rows(&path, delimiter, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        while let Some(row) = rx.recv().await {
            match row? {
                Row::Record(row) => sink.send(RawRecord::CsvRow(row)).await?,
                Row::Malformed(line, reason) => {
                    warn!(line, "Error in processing record: {}. Skipping", reason);
                    ctx.summary.add_skipped(1);
                }
            }
        }
        reader
            .await
            .map_err(|e| Error::FatalSource(format!("Task join error: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "csv_file_tests.rs"]
mod tests;
