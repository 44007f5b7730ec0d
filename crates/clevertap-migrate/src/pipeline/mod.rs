//! Migration pipeline orchestration.
//!
//! Source, transformer, batcher and uploader pools run as separate tasks
//! linked by bounded channels. A fatal error in any stage cancels the
//! whole run; every stage then drains and returns.

pub mod batcher;
pub mod cancel;
pub mod uploader;

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::{MigrationConfig, PipelineLimits, SourceConfig};
use crate::connectors::leanplum::LeanplumExporter;
use crate::connectors::{create_connector, SourceContext};
use crate::error::{Error, Result};
use crate::record::{ApiBatch, DestinationRecord, Os, Output, RawRecord};
use crate::schema::SchemaMap;
use crate::summary::{Summary, SummaryCounts};
use crate::transform::{create_transformer, RecordTransformer};
use batcher::run_batcher;
use cancel::{channel, RunControl, Sink};
use uploader::{spawn_pool, Uploader};

/// Capacity of every inter-stage channel.
pub const CHANNEL_CAPACITY: usize = 8;

/// Migration statistics.
#[derive(Debug, Default, Clone)]
pub struct MigrationStats {
    /// Final summary counters.
    pub counts: SummaryCounts,
    /// Object keys written by a Leanplum export run.
    pub exported_objects: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl MigrationStats {
    /// Records accepted per second.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.counts.processed as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Migration pipeline.
pub struct Pipeline {
    config: MigrationConfig,
    control: RunControl,
    summary: Arc<Summary>,
    show_progress: bool,
}

impl Pipeline {
    /// Create a new migration pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            control: RunControl::new(),
            summary: Arc::new(Summary::new()),
            show_progress: false,
        })
    }

    /// Shows a spinner with the uploaded record count.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run control, for wiring external cancellation such as Ctrl-C.
    #[must_use]
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Shared run summary.
    #[must_use]
    pub fn summary(&self) -> Arc<Summary> {
        Arc::clone(&self.summary)
    }

    /// Run the migration pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] when a stage failed fatally and
    /// [`Error::Cancelled`] when the run was cancelled from outside.
    pub async fn run(&mut self) -> Result<MigrationStats> {
        let start = Instant::now();
        let options = &self.config.options;
        info!(
            source = self.config.source.name(),
            dry_run = options.dry_run,
            "Starting migration pipeline"
        );

        if let SourceConfig::LeanplumExport(cfg) = &self.config.source {
            let exporter = LeanplumExporter::new(cfg.clone(), options.source_retry_delay());
            let keys = exporter.run(self.control.token()).await?;
            return Ok(MigrationStats {
                counts: self.summary.snapshot(),
                exported_objects: keys.len() as u64,
                duration_secs: start.elapsed().as_secs_f64(),
            });
        }

        let schema = match &options.schema_path {
            Some(path) => {
                let schema = SchemaMap::from_file(path)?;
                info!(properties = schema.len(), "Loaded schema");
                schema
            }
            None => SchemaMap::default(),
        };
        let connector = create_connector(&self.config)?;
        let transformer: Arc<dyn RecordTransformer> =
            Arc::from(create_transformer(&self.config, Arc::new(schema))?);
        let limits = self.config.limits();
        debug!(?limits, "Pipeline limits");

        let progress = create_progress_bar(self.show_progress);
        let uploader = Arc::new(
            Uploader::new(
                self.config.account.clone(),
                options.dry_run,
                options.upload_retry_delay(),
                Arc::clone(&self.summary),
            )
            .with_progress(progress.clone()),
        );

        let mut tasks = self.spawn_stages(connector, transformer, uploader, limits);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                self.control
                    .fail("task", &Error::Upload(format!("task failed: {e}")));
            }
        }
        progress.finish_and_clear();

        let stats = MigrationStats {
            counts: self.summary.snapshot(),
            exported_objects: 0,
            duration_secs: start.elapsed().as_secs_f64(),
        };
        if let Some(fatal) = self.control.fatal_error() {
            error!("Migration aborted: {}", fatal);
            return Err(Error::Aborted(fatal));
        }
        if self.control.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!(
            "Migration complete: {} processed, {} unprocessed in {:.2}s ({:.0} records/sec)",
            stats.counts.processed,
            stats.counts.unprocessed,
            stats.duration_secs,
            stats.throughput()
        );
        Ok(stats)
    }

    fn spawn_stages(
        &self,
        mut connector: Box<dyn crate::connectors::SourceConnector>,
        transformer: Arc<dyn RecordTransformer>,
        uploader: Arc<Uploader>,
        limits: PipelineLimits,
    ) -> JoinSet<()> {
        let token = self.control.token().clone();
        let (raw_sink, raw_rx) = channel::<RawRecord>(CHANNEL_CAPACITY, &token);
        let (record_sink, record_rx) = channel::<DestinationRecord>(CHANNEL_CAPACITY, &token);
        let (batch_sink, batch_rx) = channel::<ApiBatch>(CHANNEL_CAPACITY, &token);
        let (ios_sink, ios_rx) = channel::<Vec<Value>>(CHANNEL_CAPACITY, &token);
        let (android_sink, android_rx) = channel::<Vec<Value>>(CHANNEL_CAPACITY, &token);

        let mut tasks = JoinSet::new();

        let ctx = SourceContext {
            cancel: token.clone(),
            summary: Arc::clone(&self.summary),
        };
        let control = self.control.clone();
        tasks.spawn(async move {
            let name = connector.source_type();
            let result = connector.stream(&ctx, raw_sink).await;
            if result.is_ok() {
                info!(source = name, "Source exhausted");
            }
            control.settle(name, result);
        });

        let control = self.control.clone();
        let summary = Arc::clone(&self.summary);
        tasks.spawn(async move {
            let sinks = OutputSinks {
                api: record_sink,
                ios: ios_sink,
                android: android_sink,
            };
            let result = run_transformer(raw_rx, transformer, &summary, sinks).await;
            control.settle("transform", result);
        });

        let control = self.control.clone();
        tasks.spawn(async move {
            let result = run_batcher(record_rx, limits.batch_size, batch_sink).await;
            control.settle("batcher", result);
        });

        let sdk_workers = if emits_sdk_payloads(&self.config.source) {
            limits.sdk_workers
        } else {
            1
        };
        let mut pools = vec![
            spawn_pool("api-upload", batch_rx, limits.api_workers, &self.control, {
                let uploader = Arc::clone(&uploader);
                let token = token.clone();
                move |batch: ApiBatch| {
                    let uploader = Arc::clone(&uploader);
                    let token = token.clone();
                    async move { uploader.upload_batch(&batch, &token).await }
                }
            }),
        ];
        for (os, rx) in [(Os::Ios, ios_rx), (Os::Android, android_rx)] {
            let stage = os.channel().name();
            pools.push(spawn_pool(stage, rx, sdk_workers, &self.control, {
                let uploader = Arc::clone(&uploader);
                let token = token.clone();
                move |payload: Vec<Value>| {
                    let uploader = Arc::clone(&uploader);
                    let token = token.clone();
                    async move { uploader.upload_sdk(os, &payload, &token).await }
                }
            }));
        }
        for mut pool in pools {
            tasks.spawn(async move { while pool.join_next().await.is_some() {} });
        }
        tasks
    }
}

struct OutputSinks {
    api: Sink<DestinationRecord>,
    ios: Sink<Vec<Value>>,
    android: Sink<Vec<Value>>,
}

/// Transforms raw records and routes each output to its channel.
async fn run_transformer(
    mut rx: mpsc::Receiver<RawRecord>,
    transformer: Arc<dyn RecordTransformer>,
    summary: &Summary,
    sinks: OutputSinks,
) -> Result<()> {
    let cancel = sinks.api.cancel_token().clone();
    loop {
        let raw = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            raw = rx.recv() => raw,
        };
        let Some(raw) = raw else {
            debug!(transformer = transformer.name(), "Transformer input closed");
            return Ok(());
        };
        let transformed = transformer.transform(raw);
        transformed.record(summary);
        for output in transformed.outputs {
            match output {
                Output::Api(record) => sinks.api.send(record).await?,
                Output::Sdk { os: Os::Ios, payload } => sinks.ios.send(payload).await?,
                Output::Sdk { os: Os::Android, payload } => sinks.android.send(payload).await?,
            }
        }
    }
}

fn emits_sdk_payloads(source: &SourceConfig) -> bool {
    matches!(source, SourceConfig::LeanplumS3(_))
}

fn create_progress_bar(show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} records uploaded ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
