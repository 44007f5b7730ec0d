//! Source connectors for analytics vendors and local files.

pub mod amplitude;
pub mod common;
pub mod csv_file;
pub mod json_file;
pub mod leanplum;
pub mod manifest;
pub mod mixpanel;
pub mod mparticle;
pub mod s3;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{MigrationConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::pipeline::cancel::Sink;
use crate::record::RawRecord;
use crate::summary::Summary;

/// Channel raw records are pushed into.
pub type RecordSink = Sink<RawRecord>;

/// Shared state handed to a connector while it streams.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// Run cancellation.
    pub cancel: CancellationToken,
    /// Run summary, for parse errors.
    pub summary: Arc<Summary>,
}

/// Trait for source connectors.
///
/// Implement this trait to add support for a new vendor. `stream` pushes
/// every raw record into `sink` and returns once the source is exhausted.
/// Retriable failures are retried inside the connector; an `Err` return
/// stops the whole run.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Get the source type name.
    fn source_type(&self) -> &'static str;

    /// Streams all records into `sink`.
    async fn stream(&mut self, ctx: &SourceContext, sink: RecordSink) -> Result<()>;
}

/// Create a source connector from configuration.
///
/// # Errors
///
/// Returns a config error for sources that do not stream records.
pub fn create_connector(config: &MigrationConfig) -> Result<Box<dyn SourceConnector>> {
    let options = &config.options;
    let source_retry = options.source_retry_delay();
    match &config.source {
        SourceConfig::CsvFile(cfg) => Ok(Box::new(csv_file::CsvFileConnector::new(cfg.clone()))),
        SourceConfig::JsonFile(cfg) => {
            Ok(Box::new(json_file::JsonFileConnector::new(cfg.clone())))
        }
        SourceConfig::MixpanelProfiles(cfg) => Ok(Box::new(
            mixpanel::MixpanelProfilesConnector::new(cfg.clone(), source_retry),
        )),
        SourceConfig::MixpanelEvents(cfg) => Ok(Box::new(
            mixpanel::MixpanelEventsConnector::new(cfg.clone(), options.start_ts, source_retry),
        )),
        SourceConfig::MixpanelEventFiles(cfg) => Ok(Box::new(
            mixpanel::MixpanelEventFilesConnector::new(cfg.paths.clone(), options.start_ts),
        )),
        SourceConfig::Amplitude(cfg) => Ok(Box::new(amplitude::AmplitudeConnector::new(
            cfg.clone(),
            options.start_ts,
        ))),
        SourceConfig::LeanplumS3(cfg) => {
            let store = Arc::new(s3::S3Client::new(cfg.s3.clone()));
            Ok(Box::new(leanplum::LeanplumS3Connector::new(
                cfg.manifest_path.clone(),
                manifest::ObjectLineStreamer::new(store, OBJECT_RETRY_DELAY),
            )))
        }
        SourceConfig::Mparticle(cfg) => {
            let store = Arc::new(s3::S3Client::new(cfg.s3.clone()));
            Ok(Box::new(mparticle::MparticleConnector::new(
                cfg.clone(),
                store.clone(),
                manifest::ObjectLineStreamer::new(store, source_retry),
            )))
        }
        SourceConfig::LeanplumExport(_) => Err(Error::Config(
            "leanplum_export produces a manifest and has no record stream".to_string(),
        )),
    }
}

/// Delay before re-issuing an object-store GET.
pub const OBJECT_RETRY_DELAY: Duration = Duration::from_secs(5);
