//! Amplitude export connector.
//!
//! The export API returns one zip archive holding gzip-compressed NDJSON
//! files. The archive is downloaded to disk, extracted next to itself and
//! every file is streamed line by line.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::Client;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::common::{basic_auth, before_floor, create_streaming_client, parse_json_line};
use super::{RecordSink, SourceConnector, SourceContext};
use crate::codec::{SyncLines, MAX_LINE_LENGTH};
use crate::config::AmplitudeConfig;
use crate::error::{Error, Result};
use crate::record::RawRecord;

const DEFAULT_ENDPOINT: &str = "https://amplitude.com/api/2/export";

/// Amplitude connector.
pub struct AmplitudeConnector {
    config: AmplitudeConfig,
    start_ts: Option<f64>,
    client: Client,
}

impl AmplitudeConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(config: AmplitudeConfig, start_ts: Option<f64>) -> Self {
        Self {
            config,
            start_ts,
            client: create_streaming_client(),
        }
    }

    async fn download(&self) -> Result<()> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        info!(
            start = %self.config.start,
            end = %self.config.end,
            "Fetching Amplitude export"
        );
        let resp = self
            .client
            .get(endpoint)
            .query(&[("start", &self.config.start), ("end", &self.config.end)])
            .header(
                "Authorization",
                basic_auth(&format!("{}:{}", self.config.api_key, self.config.secret_key)),
            )
            .send()
            .await
            .map_err(|e| Error::FatalSource(format!("Error downloading zip file from Amplitude: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::FatalSource(format!(
                "Error downloading zip file from Amplitude: {body} : status: {status}"
            )));
        }

        let mut file = tokio::fs::File::create(&self.config.zip_path).await?;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                Error::FatalSource(format!("Error downloading zip file from Amplitude: {e}"))
            })?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        info!(path = %self.config.zip_path.display(), "Downloaded zip file");
        Ok(())
    }
}

/// Directory an archive is extracted into: `<dir>/<stem>-extracted`.
#[must_use]
pub fn extraction_dir(zip_path: &Path) -> PathBuf {
    let stem = zip_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "amplitude".to_string());
    zip_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{stem}-extracted"))
}

/// Extracts `zip_path` into `dest`, returning the extracted files in
/// archive order.
///
/// # Errors
///
/// Returns [`Error::FatalSource`] for an entry whose path escapes `dest`.
pub fn extract_archive(zip_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(File::open(zip_path)?)?;
    std::fs::create_dir_all(dest)?;
    let mut files = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::FatalSource(format!(
                "{}: illegal file path",
                entry.name()
            )));
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        files.push(target);
    }
    Ok(files)
}

/// Reads the lines of a gzip file on a blocking thread.
fn spawn_gzip_lines(path: PathBuf) -> mpsc::Receiver<Result<String>> {
    let (tx, rx) = mpsc::channel(256);
    tokio::task::spawn_blocking(move || {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        };
        for line in SyncLines::new(GzDecoder::new(file), MAX_LINE_LENGTH) {
            if tx.blocking_send(line).is_err() {
                return;
            }
        }
    });
    rx
}

#[async_trait]
impl SourceConnector for AmplitudeConnector {
    fn source_type(&self) -> &'static str {
        "amplitude"
    }

    async fn stream(&mut self, ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        self.download().await?;

        let zip_path = self.config.zip_path.clone();
        let dest = extraction_dir(&zip_path);
        let files = tokio::task::spawn_blocking(move || extract_archive(&zip_path, &dest))
            .await
            .map_err(|e| Error::Archive(format!("Task join error: {e}")))??;
        info!(files = files.len(), "Extracted Amplitude archive");

        for path in files {
            debug!(file = %path.display(), "Streaming export file");
            let mut lines = spawn_gzip_lines(path.clone());
            while let Some(line) = lines.recv().await {
                let line = line.map_err(|e| {
                    Error::FatalSource(format!("Unable to read '{}': {e}", path.display()))
                })?;
                let Some(record) = parse_json_line(&line, &ctx.summary, "amplitude") else {
                    continue;
                };
                if before_floor(&record, self.start_ts) {
                    continue;
                }
                sink.send(RawRecord::Json(record)).await?;
            }
        }
        Ok(())
    }
}
