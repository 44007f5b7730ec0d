//! Configuration types for clevertap-migrate.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main migration configuration.
///
/// Built once at startup (from CLI flags or a YAML file) and shared
/// read-only by every pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Destination CleverTap account.
    pub account: AccountConfig,
    /// Source configuration.
    pub source: SourceConfig,
    /// Migration options.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// CleverTap account credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account id (`X-CleverTap-Account-Id`).
    pub id: String,
    /// Account passcode (`X-CleverTap-Passcode`).
    pub passcode: String,
    /// Account token, required for SDK registration payloads.
    #[serde(default)]
    pub token: Option<String>,
    /// Account region.
    #[serde(default)]
    pub region: Region,
    /// Override for the upload API URL.
    #[serde(default)]
    pub api_endpoint: Option<String>,
    /// Override for the SDK endpoint base URL.
    #[serde(default)]
    pub sdk_endpoint: Option<String>,
}

impl AccountConfig {
    /// Upload API URL for this account.
    #[must_use]
    pub fn upload_url(&self) -> String {
        self.api_endpoint.clone().unwrap_or_else(|| {
            format!("https://{}api.clevertap.com/1/upload", self.region.host_prefix())
        })
    }

    /// SDK endpoint URL for `os`.
    #[must_use]
    pub fn sdk_url(&self, os: crate::record::Os) -> String {
        let base = self.sdk_endpoint.as_deref().unwrap_or("https://wzrkt.com/a1");
        format!("{base}?os={}", os.query_value())
    }
}

/// CleverTap account region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Default region (no host prefix).
    #[default]
    Eu,
    /// India region (`in.` host prefix).
    In,
}

impl Region {
    /// Host prefix for the upload endpoint.
    #[must_use]
    pub fn host_prefix(self) -> &'static str {
        match self {
            Region::Eu => "",
            Region::In => "in.",
        }
    }
}

impl std::str::FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eu" => Ok(Region::Eu),
            "in" => Ok(Region::In),
            other => Err(Error::Config(format!(
                "Region can be either eu or in, got '{other}'"
            ))),
        }
    }
}

/// Kind of data carried by CSV and NDJSON imports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// User profiles.
    #[default]
    Profile,
    /// Behavioral events.
    Event,
}

impl DataType {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Profile => "profile",
            DataType::Event => "event",
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "profile" => Ok(DataType::Profile),
            "event" => Ok(DataType::Event),
            other => Err(Error::Config(format!(
                "Type can be either profile or event, got '{other}'"
            ))),
        }
    }
}

/// Source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceConfig {
    /// Local CSV file.
    #[serde(rename = "csv_file")]
    CsvFile(crate::connectors::csv_file::CsvFileConfig),
    /// Local NDJSON file already in CleverTap format.
    #[serde(rename = "json_file")]
    JsonFile(crate::connectors::json_file::JsonFileConfig),
    /// Mixpanel engage API (profiles).
    #[serde(rename = "mixpanel_profiles")]
    MixpanelProfiles(MixpanelConfig),
    /// Mixpanel raw export API (events).
    #[serde(rename = "mixpanel_events")]
    MixpanelEvents(MixpanelEventsConfig),
    /// Local Mixpanel raw export files (events).
    #[serde(rename = "mixpanel_event_files")]
    MixpanelEventFiles(MixpanelEventFilesConfig),
    /// Amplitude zip export.
    #[serde(rename = "amplitude")]
    Amplitude(AmplitudeConfig),
    /// Leanplum export job writing to S3 (produces a manifest).
    #[serde(rename = "leanplum_export")]
    LeanplumExport(LeanplumExportConfig),
    /// Leanplum S3 export files listed in a manifest.
    #[serde(rename = "leanplum_s3")]
    LeanplumS3(LeanplumS3Config),
    /// mParticle S3 event batches.
    #[serde(rename = "mparticle")]
    Mparticle(MparticleConfig),
}

/// Mixpanel credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixpanelConfig {
    /// API secret.
    pub secret: String,
    /// Override for the engage endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Mixpanel event export window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixpanelEventsConfig {
    /// API secret.
    pub secret: String,
    /// First day (`YYYY-MM-DD`).
    pub start_date: String,
    /// Last day (`YYYY-MM-DD`), defaults to today.
    #[serde(default)]
    pub end_date: Option<String>,
    /// Override for the export endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Local Mixpanel export files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixpanelEventFilesConfig {
    /// Files in processing order.
    pub paths: Vec<PathBuf>,
}

/// Amplitude export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplitudeConfig {
    /// API key.
    pub api_key: String,
    /// Secret key.
    pub secret_key: String,
    /// Where the downloaded zip is stored.
    pub zip_path: PathBuf,
    /// Export start (`YYYYMMDDTHH`).
    pub start: String,
    /// Export end (`YYYYMMDDTHH`).
    pub end: String,
    /// Override for the export endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// S3 bucket access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name.
    pub bucket: String,
    /// AWS region.
    pub region: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Custom endpoint (virtual-hosted style is used when absent).
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Leanplum export job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanplumExportConfig {
    /// Leanplum app id.
    pub app_id: String,
    /// Leanplum client key.
    pub client_key: String,
    /// Leanplum API endpoint.
    #[serde(default = "default_leanplum_endpoint")]
    pub api_endpoint: String,
    /// First day of the export.
    pub start_date: String,
    /// Last day of the export.
    pub end_date: String,
    /// Manifest file the exported keys are written to.
    pub manifest_path: PathBuf,
    /// Object prefix inside the bucket.
    pub object_prefix: String,
    /// Export in five-day windows.
    #[serde(default)]
    pub throttled: bool,
    /// Bucket Leanplum copies the export into.
    pub s3: S3Config,
}

/// Leanplum S3 import settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeanplumS3Config {
    /// Manifest file listing object keys.
    pub manifest_path: PathBuf,
    /// Bucket holding the exported files.
    pub s3: S3Config,
}

/// mParticle S3 import settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MparticleConfig {
    /// Bucket holding the event batches.
    pub s3: S3Config,
    /// First day; when absent the whole bucket is imported.
    #[serde(default)]
    pub start_date: Option<String>,
    /// Last day, defaults to today.
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Leanplum API used when no endpoint is configured.
pub const DEFAULT_LEANPLUM_ENDPOINT: &str = "https://www.leanplum.com/api";

fn default_leanplum_endpoint() -> String {
    DEFAULT_LEANPLUM_ENDPOINT.to_string()
}

/// Event name filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", content = "events", rename_all = "lowercase")]
pub enum EventFilterConfig {
    /// Only these events are imported.
    Allow(Vec<String>),
    /// These events are dropped.
    Deny(Vec<String>),
}

/// Migration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Kind of data for CSV/NDJSON imports.
    #[serde(default)]
    pub data_type: DataType,
    /// Dry run mode (print payloads instead of uploading).
    #[serde(default)]
    pub dry_run: bool,
    /// Schema file for property type coercion.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Events older than this epoch (seconds) are skipped.
    #[serde(default)]
    pub start_ts: Option<f64>,
    /// Drop records from European countries.
    #[serde(default)]
    pub filter_europe: bool,
    /// Allow or deny list of event names.
    #[serde(default)]
    pub event_filter: Option<EventFilterConfig>,
    /// Batch size override, capped at the source limit.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Seconds between upload retries.
    #[serde(default = "default_upload_retry_secs")]
    pub upload_retry_secs: u64,
    /// Seconds between vendor API retries.
    #[serde(default = "default_source_retry_secs")]
    pub source_retry_secs: u64,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            data_type: DataType::default(),
            dry_run: false,
            schema_path: None,
            start_ts: None,
            filter_europe: false,
            event_filter: None,
            batch_size: None,
            upload_retry_secs: default_upload_retry_secs(),
            source_retry_secs: default_source_retry_secs(),
        }
    }
}

fn default_upload_retry_secs() -> u64 {
    5
}

fn default_source_retry_secs() -> u64 {
    20
}

impl MigrationOptions {
    /// Delay between upload retries.
    #[must_use]
    pub fn upload_retry_delay(&self) -> Duration {
        Duration::from_secs(self.upload_retry_secs)
    }

    /// Delay between vendor API retries.
    #[must_use]
    pub fn source_retry_delay(&self) -> Duration {
        Duration::from_secs(self.source_retry_secs)
    }
}

/// Per-source batch size and worker counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    /// Maximum records per API batch.
    pub batch_size: usize,
    /// API upload workers.
    pub api_workers: usize,
    /// SDK upload workers per OS.
    pub sdk_workers: usize,
}

impl SourceConfig {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SourceConfig::CsvFile(_) => "csv_file",
            SourceConfig::JsonFile(_) => "json_file",
            SourceConfig::MixpanelProfiles(_) => "mixpanel_profiles",
            SourceConfig::MixpanelEvents(_) => "mixpanel_events",
            SourceConfig::MixpanelEventFiles(_) => "mixpanel_event_files",
            SourceConfig::Amplitude(_) => "amplitude",
            SourceConfig::LeanplumExport(_) => "leanplum_export",
            SourceConfig::LeanplumS3(_) => "leanplum_s3",
            SourceConfig::Mparticle(_) => "mparticle",
        }
    }

    /// Batch size and worker counts for this source.
    #[must_use]
    pub fn limits(&self) -> PipelineLimits {
        match self {
            SourceConfig::CsvFile(_) | SourceConfig::JsonFile(_) => PipelineLimits {
                batch_size: 1000,
                api_workers: 3,
                sdk_workers: 400,
            },
            SourceConfig::MixpanelProfiles(_)
            | SourceConfig::MixpanelEvents(_)
            | SourceConfig::MixpanelEventFiles(_)
            | SourceConfig::Mparticle(_) => PipelineLimits {
                batch_size: 100,
                api_workers: 3,
                sdk_workers: 400,
            },
            SourceConfig::Amplitude(_) | SourceConfig::LeanplumExport(_) => PipelineLimits {
                batch_size: 400,
                api_workers: 3,
                sdk_workers: 400,
            },
            SourceConfig::LeanplumS3(_) => PipelineLimits {
                batch_size: 400,
                api_workers: 9,
                sdk_workers: 500,
            },
        }
    }
}

/// Parses a day in `YYYY-MM-DD` or `YYYYMMDD` form.
///
/// # Errors
///
/// Returns a config error naming `field` when neither format matches.
pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .map_err(|_| {
            Error::Config(format!(
                "{field} is not in correct format. Format: <yyyy-mm-dd>"
            ))
        })
}

fn check_window(start: &str, end: Option<&str>) -> Result<()> {
    let start = parse_date(start, "Start date")?;
    if let Some(end) = end {
        let end = parse_date(end, "End date")?;
        if start > end {
            return Err(Error::Config(
                "Start date cannot be after End date".to_string(),
            ));
        }
    }
    Ok(())
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Effective limits after applying the batch size override.
    #[must_use]
    pub fn limits(&self) -> PipelineLimits {
        let mut limits = self.source.limits();
        if let Some(bs) = self.options.batch_size {
            limits.batch_size = bs.clamp(1, limits.batch_size);
        }
        limits
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.account.id.is_empty() || self.account.passcode.is_empty() {
            return Err(Error::Config(
                "account id and passcode are mandatory".to_string(),
            ));
        }
        if let Some(EventFilterConfig::Allow(names) | EventFilterConfig::Deny(names)) =
            &self.options.event_filter
        {
            if names.is_empty() {
                return Err(Error::Config("event filter list is empty".to_string()));
            }
        }
        match &self.source {
            SourceConfig::CsvFile(cfg) => {
                if self.options.data_type == DataType::Event
                    && cfg.event_name.as_deref().unwrap_or("").is_empty()
                {
                    return Err(Error::Config(
                        "Event name is mandatory for event csv uploads".to_string(),
                    ));
                }
            }
            SourceConfig::MixpanelEvents(cfg) => {
                check_window(&cfg.start_date, cfg.end_date.as_deref())?;
            }
            SourceConfig::MixpanelEventFiles(cfg) => {
                if cfg.paths.is_empty() {
                    return Err(Error::Config(
                        "at least one Mixpanel events file is required".to_string(),
                    ));
                }
            }
            SourceConfig::LeanplumExport(cfg) => {
                check_window(&cfg.start_date, Some(&cfg.end_date))?;
                if cfg.app_id.is_empty() || cfg.client_key.is_empty() {
                    return Err(Error::Config(
                        "Leanplum app id and client key are mandatory".to_string(),
                    ));
                }
            }
            SourceConfig::LeanplumS3(_) => {
                if self.account.token.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::Config(
                        "account token is mandatory for Leanplum imports".to_string(),
                    ));
                }
            }
            SourceConfig::Mparticle(cfg) => {
                if let Some(start) = &cfg.start_date {
                    check_window(start, cfg.end_date.as_deref())?;
                }
            }
            SourceConfig::Amplitude(cfg) => {
                if cfg.start.is_empty() || cfg.end.is_empty() {
                    return Err(Error::Config(
                        "Amplitude start and end are mandatory".to_string(),
                    ));
                }
            }
            SourceConfig::JsonFile(_) | SourceConfig::MixpanelProfiles(_) => {}
        }
        Ok(())
    }
}
