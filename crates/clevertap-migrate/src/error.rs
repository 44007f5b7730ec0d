//! Error types for clevertap-migrate.

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating data.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source could not be reached or answered with an unexpected status.
    #[error("Source connection error: {0}")]
    SourceConnection(String),

    /// Source rejected the supplied credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Source rate limited the request, retry after N seconds.
    #[error("Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// A source payload could not be decoded.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Unrecoverable source failure; cancels the whole pipeline.
    #[error("Fatal source error: {0}")]
    FatalSource(String),

    /// Destination upload failure.
    #[error("Upload error: {0}")]
    Upload(String),

    /// Schema file could not be parsed.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Archive could not be extracted.
    #[error("Archive error: {0}")]
    Archive(String),

    /// A stage failed fatally and the run was cancelled.
    #[error("Migration aborted: {0}")]
    Aborted(String),

    /// Pipeline was cancelled before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// ZIP error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    /// Whether this error must stop the whole pipeline.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::FatalSource(_)
                | Error::Aborted(_)
                | Error::Authentication(_)
                | Error::Config(_)
                | Error::Schema(_)
                | Error::Archive(_)
                | Error::Zip(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::FatalSource("manifest missing".into()).is_fatal());
        assert!(Error::Authentication("401".into()).is_fatal());
        assert!(!Error::SourceConnection("503".into()).is_fatal());
        assert!(!Error::Cancelled.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::RateLimit(20);
        assert_eq!(err.to_string(), "Rate limited, retry after 20s");
    }
}
