//! mParticle S3 connector.
//!
//! mParticle's S3 data feed writes event batches under
//! `<platform>/<YYYY-MM-DD>/...`. Without a start date the whole bucket is
//! imported; otherwise only the date folders of every top-level prefix
//! inside the window are listed.

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, info};

use super::common::date_range;
use super::manifest::ObjectLineStreamer;
use super::s3::{ListPage, ObjectStore};
use super::{RecordSink, SourceConnector, SourceContext};
use crate::config::{parse_date, MparticleConfig};
use crate::error::{Error, Result};

/// mParticle connector.
pub struct MparticleConnector {
    config: MparticleConfig,
    store: Arc<dyn ObjectStore>,
    streamer: ObjectLineStreamer,
}

impl MparticleConnector {
    /// Creates a connector listing `store`.
    #[must_use]
    pub fn new(
        config: MparticleConfig,
        store: Arc<dyn ObjectStore>,
        streamer: ObjectLineStreamer,
    ) -> Self {
        Self {
            config,
            store,
            streamer,
        }
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListPage> {
        self.store
            .list(prefix, delimiter, marker)
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                e => Error::FatalSource(format!(
                    "Unable to list bucket '{}' at '{prefix}': {e}",
                    self.config.s3.bucket
                )),
            })
    }

    /// Top-level prefixes of the bucket.
    async fn common_prefixes(&self) -> Result<Vec<String>> {
        let mut prefixes = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list("", Some("/"), marker.as_deref()).await?;
            prefixes.extend(page.common_prefixes);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => return Ok(prefixes),
            }
        }
    }

    /// Streams every object under `prefix`.
    async fn walk(&self, prefix: &str, sink: &RecordSink) -> Result<()> {
        let mut marker: Option<String> = None;
        loop {
            let page = self.list(prefix, None, marker.as_deref()).await?;
            for key in page.keys.iter().filter(|k| !k.ends_with('/')) {
                info!(key = %key, "Processing file");
                self.streamer.stream_object(key, sink).await?;
            }
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => return Ok(()),
            }
        }
    }

    fn window(&self) -> Result<Option<Vec<String>>> {
        let Some(start) = &self.config.start_date else {
            return Ok(None);
        };
        let start = parse_date(start, "Start date")?;
        let end = match &self.config.end_date {
            Some(end) => parse_date(end, "End date")?,
            None => Local::now().date_naive(),
        };
        Ok(Some(date_range(start, end)))
    }
}

#[async_trait]
impl SourceConnector for MparticleConnector {
    fn source_type(&self) -> &'static str {
        "mparticle"
    }

    async fn stream(&mut self, _ctx: &SourceContext, sink: RecordSink) -> Result<()> {
        let Some(days) = self.window()? else {
            info!(bucket = %self.config.s3.bucket, "Importing every object in bucket");
            return self.walk("", &sink).await;
        };

        let prefixes = self.common_prefixes().await?;
        info!(
            prefixes = ?prefixes,
            first = days.first().map(String::as_str).unwrap_or(""),
            last = days.last().map(String::as_str).unwrap_or(""),
            "Fetching events for date window"
        );
        for prefix in &prefixes {
            for day in &days {
                let folder = format!("{prefix}{day}");
                debug!(folder = %folder, "Listing date folder");
                self.walk(&folder, &sink).await?;
            }
        }
        Ok(())
    }
}
