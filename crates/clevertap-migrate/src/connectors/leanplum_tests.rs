//! Tests for the Leanplum export driver.

use super::*;
use crate::config::S3Config;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y%m%d").unwrap()
}

fn export_config(endpoint: String, manifest_path: PathBuf, throttled: bool) -> LeanplumExportConfig {
    LeanplumExportConfig {
        app_id: "app".to_string(),
        client_key: "key".to_string(),
        api_endpoint: endpoint,
        start_date: "20240101".to_string(),
        end_date: "20240112".to_string(),
        manifest_path,
        object_prefix: "ACC-1-20240101-20240112/".to_string(),
        throttled,
        s3: S3Config {
            bucket: "exports".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            endpoint: None,
        },
    }
}

#[test]
fn test_single_window_when_not_throttled() {
    let windows = export_windows(day("20240101"), day("20240112"), false);
    assert_eq!(windows, vec![(day("20240101"), day("20240112"))]);
}

#[test]
fn test_throttled_windows_clamp_last() {
    let windows = export_windows(day("20240101"), day("20240112"), true);
    assert_eq!(
        windows,
        vec![
            (day("20240101"), day("20240105")),
            (day("20240106"), day("20240110")),
            (day("20240111"), day("20240112")),
        ]
    );
}

#[test]
fn test_throttled_short_range() {
    let windows = export_windows(day("20240101"), day("20240102"), true);
    assert_eq!(windows, vec![(day("20240101"), day("20240102"))]);
}

#[tokio::test]
async fn test_export_writes_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(query_param("action", "exportData"))
        .and(query_param("s3ObjectPrefix", "ACC-1-20240101-20240112/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"jobId": "job-1", "success": true}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(query_param("action", "getExportResults"))
        .and(query_param("jobId", "job-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{
                "state": "FINISHED",
                "s3CopyStatus": {"success": [
                    {"destFile": "ACC-1-20240101-20240112/part-0", "sourceFile": "a"},
                    {"destFile": "ACC-1-20240101-20240112/part-1", "sourceFile": "b"}
                ]}
            }]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("out").join("files-20240101-20240112.txt");
    let config = export_config(format!("{}/api", server.uri()), manifest.clone(), false);

    let keys = LeanplumExporter::new(config, Duration::from_millis(1))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(keys.len(), 2);
    let written = std::fs::read_to_string(&manifest).unwrap();
    assert_eq!(
        written,
        "ACC-1-20240101-20240112/part-0\nACC-1-20240101-20240112/part-1\n"
    );
}

#[tokio::test]
async fn test_export_replaces_existing_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("action", "exportData"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"jobId": "job-2"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("action", "getExportResults"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"state": "FINISHED", "s3CopyStatus": {"success": [{"destFile": "k"}]}}]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("files.txt");
    std::fs::write(&manifest, "stale-key\n").unwrap();
    let config = export_config(server.uri(), manifest.clone(), true);

    let keys = LeanplumExporter::new(config, Duration::from_millis(1))
        .run(&CancellationToken::new())
        .await
        .unwrap();

    // Three throttled windows, one key each.
    assert_eq!(keys, vec!["k", "k", "k"]);
    assert_eq!(std::fs::read_to_string(&manifest).unwrap(), "k\nk\nk\n");
}

#[tokio::test]
async fn test_failed_job_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("action", "exportData"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"jobId": "job-3"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("action", "getExportResults"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"state": "FAILED"}]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = export_config(server.uri(), dir.path().join("files.txt"), false);

    let err = LeanplumExporter::new(config, Duration::from_millis(1))
        .run(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FatalSource(msg) if msg.contains("credentials")));
}

#[tokio::test]
async fn test_missing_job_id_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": [{}]})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = export_config(server.uri(), dir.path().join("files.txt"), false);

    let err = LeanplumExporter::new(config, Duration::from_millis(1))
        .run(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FatalSource(_)));
}

#[tokio::test]
async fn test_pending_job_is_polled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("action", "exportData"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"jobId": "job-4"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("action", "getExportResults"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"state": "RUNNING"}]
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("action", "getExportResults"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{"state": "FINISHED", "s3CopyStatus": {"success": [{"destFile": "done"}]}}]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = export_config(server.uri(), dir.path().join("files.txt"), false);

    let keys = LeanplumExporter::new(config, Duration::from_millis(1))
        .with_poll_interval(Duration::from_millis(5))
        .run(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(keys, vec!["done"]);
}
