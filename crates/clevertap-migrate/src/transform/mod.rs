//! Transformers from vendor records to CleverTap records.
//!
//! Every source is paired with one [`RecordTransformer`]. Transformers are
//! pure: they turn one [`RawRecord`] into zero or more [`Output`]s and
//! report what they skipped in the returned [`Transformed`].

pub mod csv_file;
pub mod filters;
pub mod leanplum;
pub mod mixpanel;
pub mod mparticle;
pub mod passthrough;
pub mod properties;

use std::sync::Arc;

use crate::config::{MigrationConfig, MigrationOptions, SourceConfig};
use crate::error::{Error, Result};
use crate::record::{Output, RawRecord};
use crate::schema::SchemaMap;
use crate::summary::Summary;
use filters::{is_europe, EventFilter};

/// Result of transforming one raw record.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Transformed {
    /// Records and payloads to upload.
    pub outputs: Vec<Output>,
    /// Records skipped for a missing identity, timestamp or name.
    pub skipped: u64,
    /// Events dropped by the event filter.
    pub filtered: u64,
    /// Records dropped by the Europe filter.
    pub europe_dropped: u64,
    /// Leanplum sessions read.
    pub sessions: u64,
}

impl Transformed {
    /// A single output.
    #[must_use]
    pub fn output(output: Output) -> Self {
        Self {
            outputs: vec![output],
            ..Self::default()
        }
    }

    /// One skipped record.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }

    /// One filtered event.
    #[must_use]
    pub fn filtered() -> Self {
        Self {
            filtered: 1,
            ..Self::default()
        }
    }

    /// One record dropped by the Europe filter.
    #[must_use]
    pub fn europe_dropped() -> Self {
        Self {
            europe_dropped: 1,
            ..Self::default()
        }
    }

    /// Folds `other` into `self`.
    pub fn merge(&mut self, other: Transformed) {
        self.outputs.extend(other.outputs);
        self.skipped += other.skipped;
        self.filtered += other.filtered;
        self.europe_dropped += other.europe_dropped;
        self.sessions += other.sessions;
    }

    /// Adds the counters to `summary`.
    pub fn record(&self, summary: &Summary) {
        if self.skipped > 0 {
            summary.add_skipped(self.skipped);
        }
        if self.filtered > 0 {
            summary.add_filtered(self.filtered);
        }
        if self.europe_dropped > 0 {
            summary.add_europe_dropped(self.europe_dropped);
        }
        for _ in 0..self.sessions {
            summary.add_session();
        }
    }
}

/// Settings shared by every transformer.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// Property type declarations.
    pub schema: Arc<SchemaMap>,
    /// Allow or deny list.
    pub event_filter: Option<Arc<EventFilter>>,
    /// Drop records from European countries.
    pub filter_europe: bool,
}

impl TransformContext {
    /// Builds the context from run options.
    #[must_use]
    pub fn from_options(options: &MigrationOptions, schema: Arc<SchemaMap>) -> Self {
        Self {
            schema,
            event_filter: options
                .event_filter
                .as_ref()
                .map(|cfg| Arc::new(EventFilter::from_config(cfg))),
            filter_europe: options.filter_europe,
        }
    }

    /// Whether an event named `name` passes the event filter.
    #[must_use]
    pub fn event_allowed(&self, name: &str) -> bool {
        self.event_filter.as_ref().map_or(true, |f| f.allows(name))
    }

    /// Whether a record from `country` is dropped by the Europe filter.
    #[must_use]
    pub fn blocks_country(&self, country: Option<&str>) -> bool {
        self.filter_europe && country.is_some_and(is_europe)
    }
}

/// Converts raw vendor records into destination outputs.
pub trait RecordTransformer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Transforms one raw record.
    fn transform(&self, record: RawRecord) -> Transformed;
}

/// Creates the transformer paired with the configured source.
///
/// # Errors
///
/// Returns a config error for sources that do not stream records.
pub fn create_transformer(
    config: &MigrationConfig,
    schema: Arc<SchemaMap>,
) -> Result<Box<dyn RecordTransformer>> {
    let ctx = TransformContext::from_options(&config.options, schema);
    match &config.source {
        SourceConfig::CsvFile(cfg) => Ok(Box::new(csv_file::CsvTransformer::new(
            config.options.data_type,
            cfg.event_name.clone(),
            ctx,
        ))),
        SourceConfig::JsonFile(_) => Ok(Box::new(passthrough::PassthroughTransformer::new())),
        SourceConfig::MixpanelProfiles(_) => {
            Ok(Box::new(mixpanel::MixpanelProfileTransformer::new(ctx)))
        }
        SourceConfig::MixpanelEvents(_)
        | SourceConfig::MixpanelEventFiles(_)
        | SourceConfig::Amplitude(_) => Ok(Box::new(mixpanel::MixpanelEventTransformer::new(ctx))),
        SourceConfig::LeanplumS3(_) => Ok(Box::new(leanplum::LeanplumTransformer::new(
            config.account.id.clone(),
            config.account.token.clone().unwrap_or_default(),
            ctx,
        ))),
        SourceConfig::Mparticle(_) => Ok(Box::new(mparticle::MparticleTransformer::new(ctx))),
        SourceConfig::LeanplumExport(_) => Err(Error::Config(
            "leanplum_export produces a manifest and has no records to transform".to_string(),
        )),
    }
}
