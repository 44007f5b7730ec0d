//! CleverTap upload workers.
//!
//! API batches go to the upload endpoint with account headers; SDK
//! registration payloads go to the per-OS SDK endpoint. Transport errors
//! and 5xx responses are retried until the run is cancelled.

use indicatif::ProgressBar;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancel::RunControl;
use crate::config::AccountConfig;
use crate::connectors::common::create_http_client;
use crate::error::{Error, Result};
use crate::record::{ApiBatch, Os};
use crate::retry::sleep_or_cancel;
use crate::summary::Summary;

/// Error text CleverTap returns for transiently rejected profile batches.
pub const MALFORMED_REQUEST: &str = "Malformed request";

/// Upload API response body.
#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    processed: u64,
    #[serde(default)]
    unprocessed: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

enum Attempt {
    Done,
    Retry(String),
}

/// Sends payloads to CleverTap.
pub struct Uploader {
    client: Client,
    account: AccountConfig,
    dry_run: bool,
    retry_delay: Duration,
    summary: Arc<Summary>,
    progress: ProgressBar,
}

impl Uploader {
    /// Creates an uploader for `account`.
    #[must_use]
    pub fn new(
        account: AccountConfig,
        dry_run: bool,
        retry_delay: Duration,
        summary: Arc<Summary>,
    ) -> Self {
        Self {
            client: create_http_client(),
            account,
            dry_run,
            retry_delay,
            summary,
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports accepted records on `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Uploads one API batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the run is cancelled while
    /// retrying.
    pub async fn upload_batch(&self, batch: &ApiBatch, cancel: &CancellationToken) -> Result<()> {
        if self.dry_run {
            return self.print(batch);
        }
        let body = serde_json::to_vec(batch)?;
        let url = self.account.upload_url();
        loop {
            let request = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .header("X-CleverTap-Account-Id", &self.account.id)
                .header("X-CleverTap-Passcode", &self.account.passcode)
                .body(body.clone());
            let sent = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                sent = request.send() => sent,
            };
            let attempt = match sent {
                Ok(resp) => self.handle_api_response(resp, batch).await,
                Err(e) => Attempt::Retry(e.to_string()),
            };
            match attempt {
                Attempt::Done => return Ok(()),
                Attempt::Retry(reason) => {
                    warn!(
                        records = batch.len(),
                        "Upload failed: {}. Retrying after {:?}", reason, self.retry_delay
                    );
                    sleep_or_cancel(self.retry_delay, cancel).await?;
                }
            }
        }
    }

    async fn handle_api_response(&self, resp: reqwest::Response, batch: &ApiBatch) -> Attempt {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        match status {
            200 => {
                match serde_json::from_str::<UploadResponse>(&text) {
                    Ok(parsed) => {
                        let unprocessed = parsed.unprocessed.len() as u64;
                        self.summary.record_response(parsed.processed, unprocessed);
                        self.progress.inc(parsed.processed);
                        debug!(
                            status = %parsed.status,
                            processed = parsed.processed,
                            unprocessed,
                            "API response"
                        );
                        if unprocessed > 0 {
                            info!("Unprocessed records: {}", text);
                        }
                    }
                    Err(e) => warn!("Unable to parse API response {}: {}", text, e),
                }
                self.summary.add_batch();
                Attempt::Done
            }
            400 => {
                let parsed: UploadResponse = serde_json::from_str(&text).unwrap_or_default();
                if batch.is_profile() && parsed.error.as_deref() == Some(MALFORMED_REQUEST) {
                    return Attempt::Retry(format!("status 400: {text}"));
                }
                let payload = serde_json::to_string(batch).unwrap_or_default();
                warn!(records = batch.len(), "Batch rejected with status 400: {}. Payload: {}", text, payload);
                self.summary.add_rejected(batch.len() as u64);
                Attempt::Done
            }
            s if s < 500 => {
                warn!(status = s, "API response body: {}", text);
                Attempt::Done
            }
            s => Attempt::Retry(format!("status {s}: {text}")),
        }
    }

    /// Uploads one SDK registration payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the run is cancelled while
    /// retrying.
    pub async fn upload_sdk(&self, os: Os, payload: &[Value], cancel: &CancellationToken) -> Result<()> {
        if self.dry_run {
            return self.print(payload);
        }
        let body = serde_json::to_vec(payload)?;
        let url = self.account.sdk_url(os);
        loop {
            let request = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            let sent = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                sent = request.send() => sent,
            };
            let reason = match sent {
                Ok(resp) if resp.status().as_u16() < 500 => {
                    self.summary.add_batch();
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    format!("status {status}: {}", resp.text().await.unwrap_or_default())
                }
                Err(e) => e.to_string(),
            };
            warn!(os = os.query_value(), "SDK upload failed: {}. Retrying after {:?}", reason, self.retry_delay);
            sleep_or_cancel(self.retry_delay, cancel).await?;
        }
    }

    /// Dry run: one JSON line per payload on stdout.
    fn print<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let line = serde_json::to_string(payload)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        self.summary.add_batch();
        Ok(())
    }
}

/// Spawns `workers` tasks draining `rx` with `handler`.
///
/// Receivers are shared; a handler error other than cancellation is fatal
/// for the run.
pub fn spawn_pool<T, F, Fut>(
    name: &'static str,
    rx: mpsc::Receiver<T>,
    workers: usize,
    control: &RunControl,
    handler: F,
) -> JoinSet<()>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let rx = Arc::new(Mutex::new(rx));
    let mut set = JoinSet::new();
    for _ in 0..workers.max(1) {
        let rx = Arc::clone(&rx);
        let control = control.clone();
        let handler = handler.clone();
        set.spawn(async move {
            loop {
                let item = {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        () = control.token().cancelled() => None,
                        item = rx.recv() => item,
                    }
                };
                let Some(item) = item else {
                    break;
                };
                let result = handler(item).await;
                if result.is_err() {
                    control.settle(name, result);
                    break;
                }
            }
        });
    }
    set
}

#[cfg(test)]
#[path = "uploader_tests.rs"]
mod tests;
