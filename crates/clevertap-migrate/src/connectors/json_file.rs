//! NDJSON file connector.
//!
//! Each line holds one record already in upload shape
//! (`{"type": ..., "identity": ..., "ts": ..., ...}`).

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use super::common::{lines, parse_json_line};
use crate::codec::MAX_LINE_LENGTH;
use crate::connectors::{RecordSink, SourceConnector, SourceContext};
use crate::error::{Error, Result};
use crate::record::RawRecord;

/// Configuration for NDJSON file import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonFileConfig {
    /// Path to the NDJSON file.
    pub path: PathBuf,
}

/// NDJSON file connector.
pub struct JsonFileConnector {
    config: JsonFileConfig,
}

impl JsonFileConnector {
    /// Creates a new NDJSON file connector.
    #[must_use]
    pub fn new(config: JsonFileConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceConnector for JsonFileConnector {
    fn source_type(&self) -> &'static str {
        "json_file"
    }

    async fn stream(&mut self, ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        let path = &self.config.path;
        info!(file = %path.display(), "Reading JSON file");
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::FatalSource(format!("Unable to open '{}': {e}", path.display()))
        })?;

        let mut body = lines(file, MAX_LINE_LENGTH);
        while let Some(line) = body.next().await {
            let line = line.map_err(|e| {
                Error::FatalSource(format!("Unable to read '{}': {e}", path.display()))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(record) = parse_json_line(&line, &ctx.summary, "json_file") {
                sink.send(RawRecord::Json(record)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "json_file_tests.rs"]
mod tests;
