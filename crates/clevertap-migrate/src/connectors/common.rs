//! Common utilities shared across connectors.
//!
//! HTTP client construction, vendor auth headers, status classification
//! and streaming NDJSON bodies.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Duration as ChronoDuration, NaiveDate};
use futures::TryStreamExt;
use reqwest::Client;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::warn;

use crate::codec::LineCodec;
use crate::error::Error;
use crate::summary::Summary;

/// Timeout for short JSON calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Ceiling for large export bodies.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Boxed byte reader.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Lines of a streamed body.
pub type BodyLines = FramedRead<ByteReader, LineCodec>;

/// Creates a configured HTTP client with timeout.
#[must_use]
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(20)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Creates a client for multi-gigabyte downloads.
#[must_use]
pub fn create_streaming_client() -> Client {
    Client::builder()
        .timeout(LONG_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// `Authorization` header value for HTTP Basic auth over `credentials`.
#[must_use]
pub fn basic_auth(credentials: &str) -> String {
    format!("Basic {}", STANDARD.encode(credentials))
}

/// Handles HTTP error responses and returns appropriate errors.
pub fn handle_http_error(status_code: u16, body: &str, source_name: &str) -> Error {
    match status_code {
        429 => Error::RateLimit(60),
        401 | 403 => Error::Authentication(format!("{source_name} auth failed: {body}")),
        _ => Error::SourceConnection(format!("{source_name} error {status_code}: {body}")),
    }
}

/// Adapts any async reader into a line stream.
pub fn lines<R>(reader: R, max_line: usize) -> BodyLines
where
    R: AsyncRead + Send + 'static,
{
    FramedRead::new(Box::pin(reader), LineCodec::new(max_line))
}

/// Adapts a response body into a byte reader.
pub fn body_reader(resp: reqwest::Response) -> ByteReader {
    Box::pin(StreamReader::new(
        resp.bytes_stream().map_err(std::io::Error::other),
    ))
}

/// Parses one NDJSON line, recording failures in the summary.
pub fn parse_json_line(line: &str, summary: &Summary, source_name: &str) -> Option<Value> {
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(source = source_name, "Error parsing record {}: {}. Skipping", line, e);
            summary.add_parse_error(line);
            None
        }
    }
}

/// Epoch seconds of a JSON `time`-like value.
#[must_use]
pub fn json_epoch(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether `record.properties.time` is below the `start_ts` floor.
#[must_use]
pub fn before_floor(record: &Value, start_ts: Option<f64>) -> bool {
    let Some(floor) = start_ts.filter(|f| *f > 0.0) else {
        return false;
    };
    record
        .pointer("/properties/time")
        .and_then(json_epoch)
        .is_some_and(|ts| ts < floor)
}

/// Days of `[start, end]` in `YYYY-MM-DD` form.
#[must_use]
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        days.push(day.format("%Y-%m-%d").to_string());
        day += ChronoDuration::days(1);
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_auth() {
        assert_eq!(basic_auth("secret"), "Basic c2VjcmV0");
        assert_eq!(basic_auth("key:secret"), "Basic a2V5OnNlY3JldA==");
    }

    #[test]
    fn test_handle_http_error_rate_limit() {
        let err = handle_http_error(429, "too many requests", "Mixpanel");
        assert!(matches!(err, Error::RateLimit(60)));
    }

    #[test]
    fn test_handle_http_error_auth() {
        let err = handle_http_error(401, "unauthorized", "Mixpanel");
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_handle_http_error_other() {
        let err = handle_http_error(500, "internal error", "Test");
        assert!(matches!(err, Error::SourceConnection(_)));
    }

    #[test]
    fn test_parse_json_line_records_errors() {
        let summary = Summary::new();
        assert!(parse_json_line(r#"{"event":"x"}"#, &summary, "test").is_some());
        assert!(parse_json_line("{broken", &summary, "test").is_none());
        assert_eq!(summary.snapshot().parse_errors, vec!["{broken".to_string()]);
    }

    #[test]
    fn test_before_floor() {
        let old = json!({"event": "Play", "properties": {"time": 1000}});
        let new = json!({"event": "Play", "properties": {"time": 3000}});
        assert!(before_floor(&old, Some(2000.0)));
        assert!(!before_floor(&new, Some(2000.0)));
        assert!(!before_floor(&old, Some(0.0)));
        assert!(!before_floor(&old, None));
    }

    #[test]
    fn test_date_range() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            date_range(start, end),
            vec!["2024-02-28", "2024-02-29", "2024-03-01"]
        );
        assert!(date_range(end, start).is_empty());
    }

    #[test]
    fn test_create_http_client() {
        let client = create_http_client();
        assert!(client.get("http://example.com").build().is_ok());
    }
}
