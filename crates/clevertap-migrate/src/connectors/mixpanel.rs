//! Mixpanel connectors.
//!
//! Profiles come from the paginated engage API, events from the raw export
//! API (one NDJSON body per day) or from export files saved locally.

use async_trait::async_trait;
use chrono::Local;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use super::common::{
    basic_auth, before_floor, body_reader, create_http_client, create_streaming_client,
    date_range, handle_http_error, lines, parse_json_line,
};
use super::{RecordSink, SourceConnector, SourceContext};
use crate::codec::MAX_LINE_LENGTH;
use crate::config::{parse_date, MixpanelConfig, MixpanelEventsConfig};
use crate::error::{Error, Result};
use crate::record::RawRecord;
use crate::retry::{sleep_or_cancel, with_retry, RetryPolicy};

const PROFILES_ENDPOINT: &str = "https://mixpanel.com/api/2.0/engage/";
const EVENTS_ENDPOINT: &str = "https://data.mixpanel.com/api/2.0/export/";

/// One page of the engage API.
#[derive(Debug, Deserialize)]
struct EngagePage {
    #[serde(default)]
    page: u64,
    #[serde(default)]
    page_size: usize,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    session_id: String,
}

/// Mixpanel profile connector.
pub struct MixpanelProfilesConnector {
    config: MixpanelConfig,
    client: Client,
    retry: RetryPolicy,
}

impl MixpanelProfilesConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(config: MixpanelConfig, retry_delay: Duration) -> Self {
        Self {
            config,
            client: create_http_client(),
            retry: RetryPolicy::fixed(retry_delay),
        }
    }

    async fn fetch_page(&self, session: Option<(&str, u64)>, ctx: &SourceContext) -> Result<EngagePage> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or(PROFILES_ENDPOINT);
        let auth = basic_auth(&self.config.secret);
        let client = &self.client;
        with_retry(&self.retry, &ctx.cancel, "Mixpanel engage", || {
            let mut request = client.get(endpoint).header("Authorization", &auth);
            if let Some((session_id, page)) = session {
                request = request.query(&[("session_id", session_id.to_string()), ("page", page.to_string())]);
            }
            async move {
                let resp = request.send().await?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(handle_http_error(status.as_u16(), &body, "Mixpanel"));
                }
                resp.json::<EngagePage>().await.map_err(|e| {
                    Error::Extraction(format!("Error parsing profiles json response from Mixpanel: {e}"))
                })
            }
        })
        .await
    }
}

#[async_trait]
impl SourceConnector for MixpanelProfilesConnector {
    fn source_type(&self) -> &'static str {
        "mixpanel_profiles"
    }

    async fn stream(&mut self, ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        let first = self.fetch_page(None, ctx).await?;
        let session_id = first.session_id.clone();
        let page_size = first.page_size;
        info!(page_size, session_id = %session_id, "Mixpanel engage session");

        let mut current = first;
        loop {
            info!(page = current.page, "Fetched profiles page");
            let count = current.results.len();
            let next_page = current.page + 1;
            for result in current.results {
                sink.send(RawRecord::Json(result)).await?;
            }
            if page_size == 0 || count < page_size {
                return Ok(());
            }
            current = self.fetch_page(Some((session_id.as_str(), next_page)), ctx).await?;
        }
    }
}

/// Sends one export line downstream unless it is malformed or older than
/// the floor.
async fn emit_event_line(
    line: &str,
    ctx: &SourceContext,
    start_ts: Option<f64>,
    sink: &RecordSink,
) -> Result<()> {
    let Some(record) = parse_json_line(line, &ctx.summary, "mixpanel") else {
        return Ok(());
    };
    if before_floor(&record, start_ts) {
        return Ok(());
    }
    sink.send(RawRecord::Json(record)).await
}

/// Mixpanel raw export connector.
pub struct MixpanelEventsConnector {
    config: MixpanelEventsConfig,
    start_ts: Option<f64>,
    client: Client,
    retry: RetryPolicy,
}

impl MixpanelEventsConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(config: MixpanelEventsConfig, start_ts: Option<f64>, retry_delay: Duration) -> Self {
        Self {
            config,
            start_ts,
            client: create_streaming_client(),
            retry: RetryPolicy::fixed(retry_delay),
        }
    }

    fn days(&self) -> Result<Vec<String>> {
        let start = parse_date(&self.config.start_date, "Start date")?;
        let end = match &self.config.end_date {
            Some(end) => parse_date(end, "End date")?,
            None => Local::now().date_naive(),
        };
        Ok(date_range(start, end))
    }

    async fn open_day(&self, day: &str, ctx: &SourceContext) -> Result<reqwest::Response> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or(EVENTS_ENDPOINT);
        let auth = basic_auth(&self.config.secret);
        let client = &self.client;
        with_retry(&self.retry, &ctx.cancel, "Mixpanel export", || {
            let request = client
                .get(endpoint)
                .query(&[("from_date", day), ("to_date", day)])
                .header("Authorization", &auth);
            async move {
                let resp = request.send().await?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(handle_http_error(status.as_u16(), &body, "Mixpanel"));
                }
                Ok(resp)
            }
        })
        .await
    }

    /// Streams one day, resuming after broken bodies.
    async fn stream_day(&self, day: &str, ctx: &SourceContext, sink: &RecordSink) -> Result<u64> {
        let mut emitted: u64 = 0;
        loop {
            let resp = self.open_day(day, ctx).await?;
            let mut body = lines(body_reader(resp), MAX_LINE_LENGTH);
            let mut seen: u64 = 0;
            let outcome = loop {
                let next = tokio::select! {
                    () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                    next = body.next() => next,
                };
                match next {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(e),
                    Some(Ok(line)) => {
                        seen += 1;
                        if seen <= emitted {
                            continue;
                        }
                        emitted = seen;
                        emit_event_line(&line, ctx, self.start_ts, sink).await?;
                    }
                }
            };
            match outcome {
                Ok(()) => return Ok(emitted),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        day,
                        lines = emitted,
                        "Error reading Mixpanel export: {}. Retrying after {:?}",
                        e,
                        self.retry.delay
                    );
                    sleep_or_cancel(self.retry.delay, &ctx.cancel).await?;
                }
            }
        }
    }
}

#[async_trait]
impl SourceConnector for MixpanelEventsConnector {
    fn source_type(&self) -> &'static str {
        "mixpanel_events"
    }

    async fn stream(&mut self, ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        let days = self.days()?;
        info!(
            start = days.first().map(String::as_str).unwrap_or(""),
            end = days.last().map(String::as_str).unwrap_or(""),
            "Fetching Mixpanel events"
        );
        for day in &days {
            info!(day = %day, "Fetching events data from Mixpanel");
            let lines = self.stream_day(day, ctx, &sink).await?;
            info!(day = %day, lines, "Mixpanel day complete");
        }
        Ok(())
    }
}

/// Local Mixpanel export files.
pub struct MixpanelEventFilesConnector {
    paths: Vec<PathBuf>,
    start_ts: Option<f64>,
}

impl MixpanelEventFilesConnector {
    /// Creates a connector over `paths`, read in order.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>, start_ts: Option<f64>) -> Self {
        Self { paths, start_ts }
    }
}

#[async_trait]
impl SourceConnector for MixpanelEventFilesConnector {
    fn source_type(&self) -> &'static str {
        "mixpanel_event_files"
    }

    async fn stream(&mut self, ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        for path in &self.paths {
            info!(file = %path.display(), "Reading Mixpanel events file");
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                Error::FatalSource(format!("Unable to open '{}': {e}", path.display()))
            })?;
            let mut body = lines(file, MAX_LINE_LENGTH);
            while let Some(line) = body.next().await {
                let line = line.map_err(|e| {
                    Error::FatalSource(format!("Unable to read '{}': {e}", path.display()))
                })?;
                emit_event_line(&line, ctx, self.start_ts, &sink).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "mixpanel_tests.rs"]
mod tests;
