//! Tests for the Mixpanel connectors.

use super::*;
use crate::pipeline::cancel::channel;
use crate::summary::Summary;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FAST: Duration = Duration::from_millis(1);

fn context() -> (SourceContext, RecordSink, mpsc::Receiver<RawRecord>) {
    let token = CancellationToken::new();
    let (sink, rx) = channel(256, &token);
    let ctx = SourceContext {
        cancel: token,
        summary: Arc::new(Summary::new()),
    };
    (ctx, sink, rx)
}

fn collect(rx: &mut mpsc::Receiver<RawRecord>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(RawRecord::Json(v)) = rx.try_recv() {
        out.push(v);
    }
    out
}

fn profiles_connector(server: &MockServer) -> MixpanelProfilesConnector {
    MixpanelProfilesConnector::new(
        MixpanelConfig {
            secret: "secret".to_string(),
            endpoint: Some(format!("{}/api/2.0/engage/", server.uri())),
        },
        FAST,
    )
}

fn events_connector(server: &MockServer, start: &str, end: &str, start_ts: Option<f64>) -> MixpanelEventsConnector {
    MixpanelEventsConnector::new(
        MixpanelEventsConfig {
            secret: "secret".to_string(),
            start_date: start.to_string(),
            end_date: Some(end.to_string()),
            endpoint: Some(format!("{}/api/2.0/export/", server.uri())),
        },
        start_ts,
        FAST,
    )
}

// ==================== Profiles ====================

#[tokio::test]
async fn test_profiles_follow_session_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/engage/"))
        .and(query_param("session_id", "S1"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 1, "page_size": 2, "session_id": "S1",
            "results": [{"$distinct_id": "u3", "$properties": {}}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/engage/"))
        .and(header("Authorization", "Basic c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 0, "page_size": 2, "session_id": "S1",
            "results": [
                {"$distinct_id": "u1", "$properties": {"$email": "a@x.io"}},
                {"$distinct_id": "u2", "$properties": {}}
            ]
        })))
        .mount(&server)
        .await;

    let (ctx, sink, mut rx) = context();
    profiles_connector(&server).stream(&ctx, sink).await.unwrap();

    let ids: Vec<String> = collect(&mut rx)
        .iter()
        .map(|r| r["$distinct_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["u1", "u2", "u3"]);
}

#[tokio::test]
async fn test_profiles_retry_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 0, "page_size": 1000, "session_id": "S",
            "results": [{"$distinct_id": "u1"}]
        })))
        .mount(&server)
        .await;

    let (ctx, sink, mut rx) = context();
    profiles_connector(&server).stream(&ctx, sink).await.unwrap();

    assert_eq!(collect(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_profiles_retry_undecodable_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 0, "page_size": 10, "results": []
        })))
        .mount(&server)
        .await;

    let (ctx, sink, mut rx) = context();
    profiles_connector(&server).stream(&ctx, sink).await.unwrap();

    assert!(collect(&mut rx).is_empty());
}

#[tokio::test]
async fn test_profiles_auth_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad secret"))
        .mount(&server)
        .await;

    let (ctx, sink, _rx) = context();
    let err = profiles_connector(&server).stream(&ctx, sink).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert!(err.is_fatal());
}

// ==================== Events ====================

#[tokio::test]
async fn test_events_per_day_with_floor_and_parse_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/export/"))
        .and(query_param("from_date", "2024-01-01"))
        .and(query_param("to_date", "2024-01-01"))
        .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
            "{\"event\":\"Play\",\"properties\":{\"distinct_id\":\"u1\",\"time\":1700000100}}\r\n",
            "{\"event\":\"Old\",\"properties\":{\"distinct_id\":\"u1\",\"time\":1600000000}}\r\n",
            "{not json\r\n",
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/export/"))
        .and(query_param("from_date", "2024-01-02"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"event\":\"Stop\",\"properties\":{\"distinct_id\":\"u2\",\"time\":1700000200}}\n",
        ))
        .mount(&server)
        .await;

    let (ctx, sink, mut rx) = context();
    events_connector(&server, "2024-01-01", "2024-01-02", Some(1_700_000_000.0))
        .stream(&ctx, sink)
        .await
        .unwrap();

    let names: Vec<String> = collect(&mut rx)
        .iter()
        .map(|r| r["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Play", "Stop"]);
    assert_eq!(ctx.summary.snapshot().parse_errors, vec!["{not json".to_string()]);
}

#[tokio::test]
async fn test_events_retry_failed_day() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"event\":\"Play\",\"properties\":{\"distinct_id\":\"u1\",\"time\":1}}\n",
        ))
        .mount(&server)
        .await;

    let (ctx, sink, mut rx) = context();
    events_connector(&server, "2024-01-01", "2024-01-01", None)
        .stream(&ctx, sink)
        .await
        .unwrap();

    assert_eq!(collect(&mut rx).len(), 1);
}

#[tokio::test]
async fn test_events_cancelled_while_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (ctx, sink, _rx) = context();
    let mut connector = MixpanelEventsConnector::new(
        MixpanelEventsConfig {
            secret: "secret".to_string(),
            start_date: "2024-01-01".to_string(),
            end_date: None,
            endpoint: Some(server.uri()),
        },
        None,
        Duration::from_secs(60),
    );
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = connector.stream(&ctx, sink).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

// ==================== Event files ====================

#[tokio::test]
async fn test_event_files_in_order() {
    let mut first = NamedTempFile::new().unwrap();
    writeln!(first, "{{\"event\":\"A\",\"properties\":{{\"distinct_id\":1,\"time\":10}}}}").unwrap();
    writeln!(first, "garbage").unwrap();
    let mut second = NamedTempFile::new().unwrap();
    write!(second, "{{\"event\":\"B\",\"properties\":{{\"distinct_id\":2,\"time\":20}}}}").unwrap();

    let (ctx, sink, mut rx) = context();
    MixpanelEventFilesConnector::new(
        vec![first.path().to_path_buf(), second.path().to_path_buf()],
        None,
    )
    .stream(&ctx, sink)
    .await
    .unwrap();

    let names: Vec<String> = collect(&mut rx)
        .iter()
        .map(|r| r["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(ctx.summary.snapshot().parse_error_count, 1);
}

#[tokio::test]
async fn test_missing_event_file_is_fatal() {
    let (ctx, sink, _rx) = context();
    let err = MixpanelEventFilesConnector::new(vec![PathBuf::from("/nonexistent/events.json")], None)
        .stream(&ctx, sink)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FatalSource(_)));
}
