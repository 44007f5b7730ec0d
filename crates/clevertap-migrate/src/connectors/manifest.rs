//! Resumable line streaming of object-store exports.
//!
//! Export objects are large NDJSON files read over a single GET. A stalled
//! or broken body is re-requested and the lines already delivered are
//! skipped, so every line reaches the sink exactly once.

use futures::StreamExt;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec::MAX_LINE_LENGTH;
use crate::connectors::common::lines;
use crate::connectors::s3::ObjectStore;
use crate::connectors::RecordSink;
use crate::error::{Error, Result};
use crate::record::RawRecord;
use crate::retry::sleep_or_cancel;

/// Longest wait for the next line of an object body.
pub const LINE_TIMEOUT: Duration = Duration::from_secs(30);

/// Streams objects line by line, resuming after failures.
pub struct ObjectLineStreamer {
    store: Arc<dyn ObjectStore>,
    retry_delay: Duration,
    line_timeout: Duration,
    max_line: usize,
}

impl ObjectLineStreamer {
    /// Creates a streamer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, retry_delay: Duration) -> Self {
        Self {
            store,
            retry_delay,
            line_timeout: LINE_TIMEOUT,
            max_line: MAX_LINE_LENGTH,
        }
    }

    /// Overrides the per-line watchdog.
    #[must_use]
    pub fn with_line_timeout(mut self, line_timeout: Duration) -> Self {
        self.line_timeout = line_timeout;
        self
    }

    /// Streams every JSON line of `key` into `sink`.
    ///
    /// Lines that are not valid JSON are skipped without being reported but
    /// still count as processed. Returns the number of lines read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the run is cancelled and fatal
    /// body errors such as an over-long line. Everything else is retried.
    pub async fn stream_object(&self, key: &str, sink: &RecordSink) -> Result<u64> {
        let cancel = sink.cancel_token().clone();
        let mut processed: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let reader = match self.store.get(key).await {
                Ok(reader) => reader,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(key, "Error fetching object: {}. Retrying", e);
                    sleep_or_cancel(self.retry_delay, &cancel).await?;
                    continue;
                }
            };

            let mut body = lines(reader, self.max_line);
            let mut seen: u64 = 0;
            let outcome = loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    next = tokio::time::timeout(self.line_timeout, body.next()) => next,
                };
                match next {
                    Err(_) => {
                        break Err(Error::SourceConnection(format!(
                            "no data for {:?}",
                            self.line_timeout
                        )))
                    }
                    Ok(None) => break Ok(()),
                    Ok(Some(Err(e))) => break Err(e),
                    Ok(Some(Ok(line))) => {
                        seen += 1;
                        if seen <= processed {
                            continue;
                        }
                        processed = seen;
                        if let Ok(value) = serde_json::from_str::<Value>(&line) {
                            sink.send(RawRecord::Json(value)).await?;
                        }
                    }
                }
            };

            match outcome {
                Ok(()) => {
                    debug!(key, lines = processed, "Object complete");
                    return Ok(processed);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        key,
                        processed,
                        "Error reading object: {}. Resuming after {:?}",
                        e,
                        self.retry_delay
                    );
                    sleep_or_cancel(self.retry_delay, &cancel).await?;
                }
            }
        }
    }

    /// Streams `keys` in order.
    ///
    /// # Errors
    ///
    /// See [`ObjectLineStreamer::stream_object`].
    pub async fn stream_keys(&self, keys: &[String], sink: &RecordSink) -> Result<u64> {
        let mut total = 0;
        for (i, key) in keys.iter().enumerate() {
            info!(key = %key, "Processing object {}/{}", i + 1, keys.len());
            total += self.stream_object(key, sink).await?;
        }
        Ok(total)
    }
}

/// Reads a manifest of object keys, one per line.
///
/// # Errors
///
/// Returns [`Error::FatalSource`] when the file cannot be read.
pub async fn read_manifest(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::FatalSource(format!("Unable to read manifest '{}': {e}", path.display()))
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
