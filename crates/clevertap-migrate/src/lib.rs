// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # CleverTap Migration Tool
//!
//! `clevertap-migrate` is a CLI tool and library for importing user profiles
//! and events from analytics vendors into CleverTap.
//!
//! ## Supported Sources
//!
//! | Source | Data | Notes |
//! |--------|------|-------|
//! | CSV file | profiles, events | header names the identity column |
//! | NDJSON file | profiles, events | records already in upload format |
//! | Mixpanel | profiles, events | engage and raw export APIs, or export files |
//! | Amplitude | events | zip export |
//! | Leanplum | profiles, events, devices | export job to S3, then S3 import |
//! | mParticle | events | S3 event batches |
//!
//! ## Quick Start
//!
//! ```bash
//! # Profiles from a CSV file
//! clevertap-migrate --csv users.csv --id ACC-ID --p PASSCODE
//!
//! # Dry run (payloads are printed instead of uploaded)
//! clevertap-migrate --config migration.yaml --dryrun
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! account:
//!   id: ACC-ID
//!   passcode: PASSCODE
//!   region: in
//!
//! source:
//!   type: mixpanel_events
//!   secret: mixpanel-secret
//!   start_date: 2024-01-01
//!   end_date: 2024-01-31
//!
//! options:
//!   filter_europe: true
//!   event_filter:
//!     mode: deny
//!     events: ["Debug Event"]
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod connectors;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod retry;
pub mod schema;
pub mod summary;
pub mod transform;

pub use config::{AccountConfig, DataType, MigrationConfig, MigrationOptions, Region, SourceConfig};
pub use connectors::{create_connector, SourceConnector};
pub use error::{Error, Result};
pub use pipeline::{MigrationStats, Pipeline};
pub use record::{ApiBatch, DestinationRecord, Identity, RawRecord};
pub use summary::{Summary, SummaryCounts};
pub use transform::{create_transformer, RecordTransformer};
