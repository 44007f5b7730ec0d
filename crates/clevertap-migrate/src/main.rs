//! CleverTap Migration CLI
//!
//! Imports profiles and events from analytics vendors into CleverTap.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use clevertap_migrate::config::{
    AmplitudeConfig, EventFilterConfig, LeanplumExportConfig, LeanplumS3Config, MixpanelConfig,
    MixpanelEventFilesConfig, MixpanelEventsConfig, MparticleConfig, S3Config,
    DEFAULT_LEANPLUM_ENDPOINT,
};
use clevertap_migrate::connectors::csv_file::CsvFileConfig;
use clevertap_migrate::connectors::json_file::JsonFileConfig;
use clevertap_migrate::{
    AccountConfig, DataType, Error, MigrationConfig, MigrationOptions, Pipeline, Region,
    SourceConfig,
};

#[derive(Parser, Debug)]
#[command(name = "clevertap-migrate")]
#[command(version)]
#[command(about = "Import profiles and events from analytics vendors into CleverTap", long_about = None)]
struct Cli {
    /// YAML configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Absolute path to the csv file
    #[arg(long = "csv", value_name = "FILE")]
    csv: Option<PathBuf>,

    /// Absolute path to an NDJSON file already in upload format
    #[arg(long = "jsonFile", value_name = "FILE")]
    json_file: Option<PathBuf>,

    /// Absolute path to the schema file
    #[arg(long = "schema", value_name = "FILE")]
    schema: Option<PathBuf>,

    /// Mixpanel API secret key
    #[arg(long = "mixpanelSecret")]
    mixpanel_secret: Option<String>,

    /// Absolute path to a Mixpanel events file (repeatable)
    #[arg(long = "mixpanelEventsFile", value_name = "FILE")]
    mixpanel_events_files: Vec<PathBuf>,

    /// Amplitude API key
    #[arg(long = "amplitudeApiKey")]
    amplitude_api_key: Option<String>,

    /// Amplitude secret key
    #[arg(long = "amplitudeSecretKey")]
    amplitude_secret_key: Option<String>,

    /// Where the Amplitude export zip is stored
    #[arg(long = "amplitudeZipFilePath", value_name = "FILE")]
    amplitude_zip_path: Option<PathBuf>,

    /// Amplitude export start <yyyymmddThh>
    #[arg(long = "amplitudeStart")]
    amplitude_start: Option<String>,

    /// Amplitude export end <yyyymmddThh>
    #[arg(long = "amplitudeEnd")]
    amplitude_end: Option<String>,

    /// Start date for exports <yyyy-mm-dd>
    #[arg(long = "startDate")]
    start_date: Option<String>,

    /// End date for exports <yyyy-mm-dd>
    #[arg(long = "endDate")]
    end_date: Option<String>,

    /// Start timestamp for events upload
    #[arg(long = "startTs")]
    start_ts: Option<f64>,

    /// CleverTap Account ID
    #[arg(long = "id")]
    id: Option<String>,

    /// CleverTap Account Passcode
    #[arg(long = "p", env = "CLEVERTAP_PASSCODE")]
    passcode: Option<String>,

    /// CleverTap Account Token
    #[arg(long = "token")]
    token: Option<String>,

    /// Event name for event csv uploads
    #[arg(long = "evtName")]
    evt_name: Option<String>,

    /// The type of data, either profile or event (default profile)
    #[arg(long = "t")]
    data_type: Option<String>,

    /// The account region, either eu or in (default eu)
    #[arg(long = "r")]
    region: Option<String>,

    /// Do a dry run, process records but do not upload
    #[arg(long = "dryrun")]
    dry_run: bool,

    /// leanplumToS3, leanplumToS3Throttled, leanplumS3ToCT or mparticle
    #[arg(long = "importService")]
    import_service: Option<String>,

    /// AWS access key id
    #[arg(long = "awsAccessKeyId", env = "AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,

    /// AWS secret access key
    #[arg(long = "awsSecretAccessKey", env = "AWS_SECRET_ACCESS_KEY")]
    aws_secret_access_key: Option<String>,

    /// AWS region
    #[arg(long = "awsRegion")]
    aws_region: Option<String>,

    /// S3 bucket name
    #[arg(long = "s3Bucket")]
    s3_bucket: Option<String>,

    /// Leanplum app id
    #[arg(long = "leanplumAppId")]
    leanplum_app_id: Option<String>,

    /// Leanplum client key
    #[arg(long = "leanplumClientKey")]
    leanplum_client_key: Option<String>,

    /// Leanplum API endpoint
    #[arg(long = "leanplumApiEndpoint")]
    leanplum_api_endpoint: Option<String>,

    /// Directory for the exported file list
    #[arg(long = "leanplumOutFilesPath", value_name = "DIR")]
    leanplum_out_files_path: Option<PathBuf>,

    /// Drop records from European countries
    #[arg(long = "filterEurope")]
    filter_europe: bool,

    /// Only import these events (comma separated)
    #[arg(long = "allowEvents", value_delimiter = ',', conflicts_with = "deny_events")]
    allow_events: Vec<String>,

    /// Do not import these events (comma separated)
    #[arg(long = "denyEvents", value_delimiter = ',')]
    deny_events: Vec<String>,

    /// Batch size override, capped at the source limit
    #[arg(long = "batchSize")]
    batch_size: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries dry-run payloads
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&cli)?;
    run_migration(config, !cli.verbose).await
}

async fn run_migration(config: MigrationConfig, show_progress: bool) -> anyhow::Result<()> {
    let show_progress = show_progress && !config.options.dry_run;
    let mut pipeline = Pipeline::new(config)?.with_progress(show_progress);

    let control = pipeline.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            control.fail("signal", &Error::Cancelled);
        }
    });

    info!("Starting migration...");
    let result = pipeline.run().await;
    pipeline.summary().log("Data");

    let stats = result?;
    if stats.exported_objects > 0 {
        info!(objects = stats.exported_objects, "Export finished");
    }
    info!("Duration: {:.2}s", stats.duration_secs);
    Ok(())
}

/// Builds the run configuration from the optional YAML file and the flags.
fn build_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let source = source_from_flags(cli)?;
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            let mut config = MigrationConfig::from_file(path)
                .with_context(|| format!("Unable to load config file {}", path.display()))?;
            if let Some(source) = source {
                config.source = source;
            }
            config
        }
        None => {
            let Some(source) = source else {
                bail!(
                    "A data source is mandatory: --csv, --jsonFile, --mixpanelSecret, \
                     --mixpanelEventsFile, --amplitudeApiKey or --importService"
                );
            };
            MigrationConfig {
                account: AccountConfig {
                    id: String::new(),
                    passcode: String::new(),
                    token: None,
                    region: Region::default(),
                    api_endpoint: None,
                    sdk_endpoint: None,
                },
                source,
                options: MigrationOptions::default(),
            }
        }
    };
    apply_overrides(&mut config, cli)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut MigrationConfig, cli: &Cli) -> anyhow::Result<()> {
    let account = &mut config.account;
    if let Some(id) = &cli.id {
        account.id = id.clone();
    }
    if let Some(passcode) = &cli.passcode {
        account.passcode = passcode.clone();
    }
    if let Some(token) = &cli.token {
        account.token = Some(token.clone());
    }
    if let Some(region) = &cli.region {
        account.region = region.parse()?;
    }

    let options = &mut config.options;
    if let Some(data_type) = &cli.data_type {
        options.data_type = data_type.parse()?;
    }
    if cli.dry_run {
        options.dry_run = true;
    }
    if let Some(schema) = &cli.schema {
        options.schema_path = Some(schema.clone());
    }
    if let Some(start_ts) = cli.start_ts {
        options.start_ts = Some(start_ts);
    }
    if cli.filter_europe {
        options.filter_europe = true;
    }
    if !cli.allow_events.is_empty() {
        options.event_filter = Some(EventFilterConfig::Allow(cli.allow_events.clone()));
    } else if !cli.deny_events.is_empty() {
        options.event_filter = Some(EventFilterConfig::Deny(cli.deny_events.clone()));
    }
    if let Some(batch_size) = cli.batch_size {
        options.batch_size = Some(batch_size);
    }
    Ok(())
}

/// Source selected by the flags, if any.
fn source_from_flags(cli: &Cli) -> anyhow::Result<Option<SourceConfig>> {
    let selected = [
        cli.csv.is_some(),
        cli.json_file.is_some(),
        cli.mixpanel_secret.is_some(),
        !cli.mixpanel_events_files.is_empty(),
        cli.amplitude_api_key.is_some(),
        cli.import_service.is_some(),
    ]
    .iter()
    .filter(|s| **s)
    .count();
    if selected > 1 {
        bail!("Only one data source is allowed");
    }
    let is_event = match &cli.data_type {
        Some(t) => t.parse::<DataType>()? == DataType::Event,
        None => false,
    };

    if let Some(path) = &cli.csv {
        return Ok(Some(SourceConfig::CsvFile(CsvFileConfig {
            path: path.clone(),
            event_name: cli.evt_name.clone(),
            delimiter: ',',
        })));
    }
    if let Some(path) = &cli.json_file {
        return Ok(Some(SourceConfig::JsonFile(JsonFileConfig { path: path.clone() })));
    }
    if let Some(secret) = &cli.mixpanel_secret {
        if !is_event {
            return Ok(Some(SourceConfig::MixpanelProfiles(MixpanelConfig {
                secret: secret.clone(),
                endpoint: None,
            })));
        }
        let start_date = cli.start_date.clone().context(
            "Start date is mandatory when exporting events from Mixpanel. Format: <yyyy-mm-dd>",
        )?;
        return Ok(Some(SourceConfig::MixpanelEvents(MixpanelEventsConfig {
            secret: secret.clone(),
            start_date,
            end_date: cli.end_date.clone(),
            endpoint: None,
        })));
    }
    if !cli.mixpanel_events_files.is_empty() {
        if !is_event {
            bail!("Mixpanel events file path is supported only with events");
        }
        return Ok(Some(SourceConfig::MixpanelEventFiles(MixpanelEventFilesConfig {
            paths: cli.mixpanel_events_files.clone(),
        })));
    }
    if let Some(api_key) = &cli.amplitude_api_key {
        let (Some(secret_key), Some(zip_path), Some(start), Some(end)) = (
            &cli.amplitude_secret_key,
            &cli.amplitude_zip_path,
            &cli.amplitude_start,
            &cli.amplitude_end,
        ) else {
            bail!(
                "amplitudeSecretKey, amplitudeZipFilePath, amplitudeStart and amplitudeEnd \
                 are mandatory for Amplitude imports"
            );
        };
        return Ok(Some(SourceConfig::Amplitude(AmplitudeConfig {
            api_key: api_key.clone(),
            secret_key: secret_key.clone(),
            zip_path: zip_path.clone(),
            start: start.clone(),
            end: end.clone(),
            endpoint: None,
        })));
    }
    match cli.import_service.as_deref() {
        None => Ok(None),
        Some(service @ ("leanplumToS3" | "leanplumToS3Throttled")) => {
            let (start, end) = leanplum_window(cli)?;
            let (Some(app_id), Some(client_key)) = (&cli.leanplum_app_id, &cli.leanplum_client_key)
            else {
                bail!("leanplumAppId and leanplumClientKey are mandatory for Leanplum exports");
            };
            let account_id = cli.id.clone().unwrap_or_default();
            Ok(Some(SourceConfig::LeanplumExport(LeanplumExportConfig {
                app_id: app_id.clone(),
                client_key: client_key.clone(),
                api_endpoint: cli
                    .leanplum_api_endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LEANPLUM_ENDPOINT.to_string()),
                manifest_path: manifest_path(cli, &start, &end),
                object_prefix: format!("{account_id}-{start}-{end}/"),
                start_date: start,
                end_date: end,
                throttled: service == "leanplumToS3Throttled",
                s3: s3_from_flags(cli)?,
            })))
        }
        Some("leanplumS3ToCT") => {
            let (start, end) = leanplum_window(cli)?;
            Ok(Some(SourceConfig::LeanplumS3(LeanplumS3Config {
                manifest_path: manifest_path(cli, &start, &end),
                s3: s3_from_flags(cli)?,
            })))
        }
        Some("mparticle") => Ok(Some(SourceConfig::Mparticle(MparticleConfig {
            s3: s3_from_flags(cli)?,
            start_date: cli.start_date.clone(),
            end_date: cli.end_date.clone(),
        }))),
        Some(other) => bail!(
            "Unknown import service '{other}'. Use leanplumToS3, leanplumToS3Throttled, \
             leanplumS3ToCT or mparticle"
        ),
    }
}

fn leanplum_window(cli: &Cli) -> anyhow::Result<(String, String)> {
    match (&cli.start_date, &cli.end_date) {
        (Some(start), Some(end)) => Ok((start.clone(), end.clone())),
        _ => bail!("startDate and endDate are mandatory for Leanplum imports"),
    }
}

/// `<outFilesPath>/files-<start>-<end>.txt`
fn manifest_path(cli: &Cli, start: &str, end: &str) -> PathBuf {
    let dir = cli
        .leanplum_out_files_path
        .as_deref()
        .unwrap_or_else(|| Path::new("."));
    dir.join(format!("files-{start}-{end}.txt"))
}

fn s3_from_flags(cli: &Cli) -> anyhow::Result<S3Config> {
    let (Some(access_key_id), Some(secret_access_key), Some(region), Some(bucket)) = (
        &cli.aws_access_key_id,
        &cli.aws_secret_access_key,
        &cli.aws_region,
        &cli.s3_bucket,
    ) else {
        bail!("awsAccessKeyId, awsSecretAccessKey, awsRegion and s3Bucket are mandatory");
    };
    Ok(S3Config {
        bucket: bucket.clone(),
        region: region.clone(),
        access_key_id: access_key_id.clone(),
        secret_access_key: secret_access_key.clone(),
        endpoint: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["clevertap-migrate"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_csv_profile_flags() {
        let cli = parse(&["--csv", "/tmp/u.csv", "--id", "ACC", "--p", "PASS", "--r", "in"]);
        let config = build_config(&cli).unwrap();

        assert!(matches!(config.source, SourceConfig::CsvFile(_)));
        assert_eq!(config.account.region, Region::In);
        assert_eq!(config.options.data_type, DataType::Profile);
        assert_eq!(config.limits().batch_size, 1000);
    }

    #[test]
    fn test_missing_account_is_rejected() {
        let cli = parse(&["--csv", "/tmp/u.csv", "--id", "ACC"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_single_source_only() {
        let cli = parse(&["--csv", "a.csv", "--mixpanelSecret", "s", "--id", "A", "--p", "P"]);
        let err = build_config(&cli).unwrap_err();
        assert!(err.to_string().contains("Only one data source"));
    }

    #[test]
    fn test_csv_events_need_name() {
        let cli = parse(&["--csv", "a.csv", "--t", "event", "--id", "A", "--p", "P"]);
        assert!(build_config(&cli).is_err());

        let cli = parse(&["--csv", "a.csv", "--t", "event", "--evtName", "Buy", "--id", "A", "--p", "P"]);
        assert!(build_config(&cli).is_ok());
    }

    #[test]
    fn test_invalid_type_and_region() {
        let cli = parse(&["--csv", "a.csv", "--t", "session", "--id", "A", "--p", "P"]);
        assert!(build_config(&cli).is_err());

        let cli = parse(&["--csv", "a.csv", "--r", "us", "--id", "A", "--p", "P"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_mixpanel_event_dates() {
        let cli = parse(&["--mixpanelSecret", "s", "--t", "event", "--id", "A", "--p", "P"]);
        assert!(build_config(&cli).is_err());

        let cli = parse(&[
            "--mixpanelSecret", "s", "--t", "event", "--startDate", "2024-02-01",
            "--endDate", "2024-01-01", "--id", "A", "--p", "P",
        ]);
        assert!(build_config(&cli).is_err());

        let cli = parse(&[
            "--mixpanelSecret", "s", "--t", "event", "--startDate", "2024-01-01",
            "--id", "A", "--p", "P",
        ]);
        assert!(matches!(build_config(&cli).unwrap().source, SourceConfig::MixpanelEvents(_)));
    }

    #[test]
    fn test_events_files_require_event_type() {
        let cli = parse(&["--mixpanelEventsFile", "a.json", "--id", "A", "--p", "P"]);
        assert!(build_config(&cli).is_err());

        let cli = parse(&[
            "--mixpanelEventsFile", "a.json", "--mixpanelEventsFile", "b.json", "--t", "event",
            "--id", "A", "--p", "P",
        ]);
        let SourceConfig::MixpanelEventFiles(cfg) = build_config(&cli).unwrap().source else {
            panic!("expected events files");
        };
        assert_eq!(cfg.paths.len(), 2);
    }

    #[test]
    fn test_leanplum_export_paths() {
        let cli = parse(&[
            "--importService", "leanplumToS3Throttled", "--id", "ACC", "--p", "P",
            "--startDate", "20240101", "--endDate", "20240110",
            "--leanplumAppId", "app", "--leanplumClientKey", "key",
            "--leanplumOutFilesPath", "/tmp/out",
            "--awsAccessKeyId", "AK", "--awsSecretAccessKey", "SK",
            "--awsRegion", "us-east-1", "--s3Bucket", "bucket",
        ]);
        let SourceConfig::LeanplumExport(cfg) = build_config(&cli).unwrap().source else {
            panic!("expected leanplum export");
        };
        assert!(cfg.throttled);
        assert_eq!(cfg.object_prefix, "ACC-20240101-20240110/");
        assert_eq!(cfg.manifest_path, PathBuf::from("/tmp/out/files-20240101-20240110.txt"));
        assert_eq!(cfg.api_endpoint, DEFAULT_LEANPLUM_ENDPOINT);
    }

    #[test]
    fn test_leanplum_import_needs_token() {
        let args = [
            "--importService", "leanplumS3ToCT", "--id", "ACC", "--p", "P",
            "--startDate", "20240101", "--endDate", "20240110",
            "--awsAccessKeyId", "AK", "--awsSecretAccessKey", "SK",
            "--awsRegion", "us-east-1", "--s3Bucket", "bucket",
        ];
        assert!(build_config(&parse(&args)).is_err());

        let mut with_token = args.to_vec();
        with_token.extend(["--token", "TOK"]);
        let config = build_config(&parse(&with_token)).unwrap();
        assert_eq!(config.limits().api_workers, 9);
    }

    #[test]
    fn test_unknown_import_service() {
        let cli = parse(&["--importService", "segment", "--id", "A", "--p", "P"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_event_filter_flags() {
        let cli = parse(&[
            "--csv", "a.csv", "--id", "A", "--p", "P", "--allowEvents", "Play,Stop",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(
            config.options.event_filter,
            Some(EventFilterConfig::Allow(vec!["Play".into(), "Stop".into()]))
        );

        let both = Cli::try_parse_from([
            "clevertap-migrate", "--csv", "a.csv", "--allowEvents", "A", "--denyEvents", "B",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "account:\n  id: FILE-ACC\n  passcode: FILE-PASS\nsource:\n  type: json_file\n  path: /tmp/in.json\noptions:\n  dry_run: false"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&["--config", &path, "--id", "FLAG-ACC", "--dryrun"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.account.id, "FLAG-ACC");
        assert_eq!(config.account.passcode, "FILE-PASS");
        assert!(config.options.dry_run);
        assert!(matches!(config.source, SourceConfig::JsonFile(_)));
    }
}
