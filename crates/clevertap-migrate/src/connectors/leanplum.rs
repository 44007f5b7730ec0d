//! Leanplum connectors.
//!
//! Leanplum data is migrated in two runs. [`LeanplumExporter`] asks
//! Leanplum to copy its raw session export into an S3 bucket and writes
//! the resulting object keys into a manifest file. [`LeanplumS3Connector`]
//! then streams the objects listed in that manifest.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::common::{create_http_client, handle_http_error};
use super::manifest::{read_manifest, ObjectLineStreamer};
use super::{RecordSink, SourceConnector, SourceContext};
use crate::config::{parse_date, LeanplumExportConfig};
use crate::error::{Error, Result};
use crate::retry::{sleep_or_cancel, with_retry, RetryPolicy};

/// Leanplum API version used for export calls.
const API_VERSION: &str = "1.0.6";

/// Days covered by one throttled export window.
const WINDOW_DAYS: i64 = 5;

/// Default interval between export job polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(120);

const CREDENTIALS_ERROR: &str = "Please check your LeanPlum or S3 credentials";

/// Streams Leanplum session exports listed in a manifest.
pub struct LeanplumS3Connector {
    manifest_path: PathBuf,
    streamer: ObjectLineStreamer,
}

impl LeanplumS3Connector {
    /// Creates a connector reading `manifest_path`.
    #[must_use]
    pub fn new(manifest_path: PathBuf, streamer: ObjectLineStreamer) -> Self {
        Self {
            manifest_path,
            streamer,
        }
    }
}

#[async_trait]
impl SourceConnector for LeanplumS3Connector {
    fn source_type(&self) -> &'static str {
        "leanplum_s3"
    }

    async fn stream(&mut self, _ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        let keys = read_manifest(&self.manifest_path).await?;
        info!(
            manifest = %self.manifest_path.display(),
            objects = keys.len(),
            "Streaming Leanplum export"
        );
        let lines = self.streamer.stream_keys(&keys, &sink).await?;
        info!(lines, "Leanplum export streamed");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    #[serde(default)]
    response: Vec<JobInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobInfo {
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    s3_copy_status: S3CopyStatus,
}

#[derive(Debug, Default, Deserialize)]
struct S3CopyStatus {
    #[serde(default)]
    success: Vec<S3CopyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3CopyEntry {
    dest_file: String,
}

/// Splits `[start, end]` into export windows.
///
/// Throttled exports use consecutive five-day windows; the last window is
/// clamped to `end`.
#[must_use]
pub fn export_windows(
    start: NaiveDate,
    end: NaiveDate,
    throttled: bool,
) -> Vec<(NaiveDate, NaiveDate)> {
    if !throttled {
        return vec![(start, end)];
    }
    let mut windows = Vec::new();
    let mut from = start;
    while from <= end {
        let to = (from + ChronoDuration::days(WINDOW_DAYS - 1)).min(end);
        windows.push((from, to));
        from = to + ChronoDuration::days(1);
    }
    windows
}

/// Drives Leanplum export jobs and writes the manifest.
pub struct LeanplumExporter {
    config: LeanplumExportConfig,
    client: Client,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl LeanplumExporter {
    /// Creates an exporter.
    #[must_use]
    pub fn new(config: LeanplumExportConfig, retry_delay: Duration) -> Self {
        Self {
            config,
            client: create_http_client(),
            retry: RetryPolicy::fixed(retry_delay),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Overrides the job poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs every export window and returns the exported object keys.
    ///
    /// An existing manifest is replaced; keys are appended as each window
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when a job cannot be started or fails.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let start = parse_date(&self.config.start_date, "Start date")?;
        let end = parse_date(&self.config.end_date, "End date")?;
        let manifest = &self.config.manifest_path;

        if let Some(parent) = manifest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(manifest).await? {
            tokio::fs::remove_file(manifest).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(manifest)
            .await?;

        info!(
            bucket = %self.config.s3.bucket,
            prefix = %self.config.object_prefix,
            manifest = %manifest.display(),
            "Exporting Leanplum data to S3"
        );

        let mut keys = Vec::new();
        for (from, to) in export_windows(start, end, self.config.throttled) {
            let from = from.format("%Y%m%d").to_string();
            let to = to.format("%Y%m%d").to_string();
            info!("Getting data for dates {} to {}", from, to);
            let files = self.export_window(&from, &to, cancel).await?;
            for key in &files {
                file.write_all(key.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
            keys.extend(files);
        }
        info!(objects = keys.len(), "Leanplum export complete");
        Ok(keys)
    }

    async fn call(&self, params: &[(&str, &str)], cancel: &CancellationToken) -> Result<JobInfo> {
        let client = &self.client;
        let config = &self.config;
        let response: JobResponse = with_retry(&self.retry, cancel, "Leanplum export", || async move {
            let resp = client
                .post(&config.api_endpoint)
                .query(&[
                    ("appId", config.app_id.as_str()),
                    ("clientKey", config.client_key.as_str()),
                    ("apiVersion", API_VERSION),
                ])
                .query(params)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(handle_http_error(status.as_u16(), &body, "Leanplum"));
            }
            resp.json()
                .await
                .map_err(|e| Error::FatalSource(format!("invalid Leanplum response: {e}")))
        })
        .await?;
        response
            .response
            .into_iter()
            .next()
            .ok_or_else(|| Error::FatalSource(CREDENTIALS_ERROR.to_string()))
    }

    async fn export_window(
        &self,
        from: &str,
        to: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let s3 = &self.config.s3;
        let job = self
            .call(
                &[
                    ("action", "exportData"),
                    ("startDate", from),
                    ("endDate", to),
                    ("s3BucketName", s3.bucket.as_str()),
                    ("s3AccessId", s3.access_key_id.as_str()),
                    ("s3AccessKey", s3.secret_access_key.as_str()),
                    ("s3ObjectPrefix", self.config.object_prefix.as_str()),
                ],
                cancel,
            )
            .await?;
        if job.job_id.is_empty() {
            return Err(Error::FatalSource(CREDENTIALS_ERROR.to_string()));
        }
        info!(job_id = %job.job_id, "Export job started");

        loop {
            let status = self
                .call(
                    &[("action", "getExportResults"), ("jobId", job.job_id.as_str())],
                    cancel,
                )
                .await?;
            match status.state.as_str() {
                "FINISHED" => {
                    return Ok(status
                        .s3_copy_status
                        .success
                        .into_iter()
                        .map(|entry| entry.dest_file)
                        .collect())
                }
                "FAILED" => return Err(Error::FatalSource(CREDENTIALS_ERROR.to_string())),
                state => {
                    info!(
                        job_id = %job.job_id,
                        state,
                        "Waiting {:?} for files to be ready",
                        self.poll_interval
                    );
                    sleep_or_cancel(self.poll_interval, cancel).await?;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "leanplum_tests.rs"]
mod tests;
