//! End-to-end tests: `NetworkCore` over the reqwest transport against a
//! local mock server.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use netweave_domain::{BackoffSetting, NetworkError, NetworkingConfiguration, ServerConfig};
use netweave_infra::reqwest_core;
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> NetworkingConfiguration {
    let mut config = NetworkingConfiguration::with_base_endpoint(server.uri());
    config.retry_policy.max_attempts = 3;
    config.retry_policy.backoff_strategy = BackoffSetting::Fixed { delay: Duration::from_millis(10) };
    config.timeout = Duration::from_secs(5);
    config
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Validates that server errors are retried over real HTTP and every
/// attempt carries the same request id.
///
/// # Test Steps
/// 1. Answer 500 twice, then 200
/// 2. Send one request with three attempts allowed
/// 3. It succeeds on the third attempt with a stable `X-Request-Id`
#[tokio::test]
async fn test_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&server)
        .await;

    let core = reqwest_core(config_for(&server)).unwrap();
    let response = core.get("/flaky").send().await.unwrap();

    assert_eq!(response.attempts, 3);
    assert_eq!(response.text().unwrap(), "finally");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
    let ids: Vec<_> = received.iter().map(|r| r.headers.get("x-request-id").cloned()).collect();
    assert!(ids[0].is_some());
    assert!(ids.iter().all(|id| *id == ids[0]));
}

/// Validates that client errors fail once with the status and body.
#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such user"))
        .expect(1)
        .mount(&server)
        .await;

    let core = reqwest_core(config_for(&server)).unwrap();
    let err = core.get("/users/9").send().await.unwrap_err();

    assert_eq!(err.attempts, 1);
    assert_eq!(err.kind(), &NetworkError::http(404, "no such user"));
}

/// Validates that gzip response bodies are decoded by the core.
#[tokio::test]
async fn test_gzip_response_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/report"))
        .and(header_exists("accept-encoding"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(gzip(br#"{"rows":3}"#)),
        )
        .mount(&server)
        .await;

    let core = reqwest_core(config_for(&server)).unwrap();
    let response = core.get("/report").send().await.unwrap();

    let value: serde_json::Value = response.json().unwrap();
    assert_eq!(value, json!({ "rows": 3 }));
}

/// Validates that large JSON bodies are sent gzip-compressed.
#[tokio::test]
async fn test_large_body_compressed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let items: Vec<String> = (0..200).map(|i| format!("item-{i}")).collect();
    let core = reqwest_core(config_for(&server)).unwrap();
    let response = core.post("/bulk").json(&json!({ "items": items })).send().await.unwrap();

    assert_eq!(response.status, 201);
}

/// Validates that a second identical GET is served from the cache.
#[tokio::test]
async fn test_cached_get_hits_server_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stable"))
        .expect(1)
        .mount(&server)
        .await;

    let core = reqwest_core(config_for(&server)).unwrap();
    let first = core.get("/config").send().await.unwrap();
    let second = core.get("/config").send().await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.body, b"stable");
}

/// Validates streaming and file downloads over real HTTP.
#[tokio::test]
async fn test_stream_and_download() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..=255u8).cycle().take(50_000).collect();
    Mock::given(method("GET"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let core = reqwest_core(config_for(&server)).unwrap();

    let chunks: Vec<Vec<u8>> = core.stream_download("/blob", 8192).map(|c| c.unwrap()).collect().await;
    assert!(chunks.iter().all(|c| c.len() <= 8192));
    assert_eq!(chunks.concat(), body);

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("blob.bin");
    let mut last = None;
    let written = core.download_file("/blob", &target, |p| last = Some(p)).await.unwrap();

    assert_eq!(written, 50_000);
    assert_eq!(std::fs::read(&target).unwrap(), body);
    let last = last.unwrap();
    assert_eq!((last.bytes_transferred, last.total_bytes), (50_000, Some(50_000)));
}

/// Validates that the background health checker takes a failing server out
/// of rotation.
///
/// # Test Steps
/// 1. Two servers; `down` answers 503 on `/health`
/// 2. Start the core with a short health check interval
/// 3. After a few checks every request lands on `up`
#[tokio::test]
async fn test_health_checks_remove_failing_server() {
    let up = MockServer::start().await;
    let down = MockServer::start().await;
    Mock::given(path("/health")).respond_with(ResponseTemplate::new(200)).mount(&up).await;
    Mock::given(path("/work")).respond_with(ResponseTemplate::new(200)).mount(&up).await;
    Mock::given(path("/health")).respond_with(ResponseTemplate::new(503)).mount(&down).await;

    let mut config = NetworkingConfiguration::default();
    config.cache_policy.enabled = false;
    config.load_balancing.health_check_interval = Duration::from_millis(50);
    config.load_balancing.servers = vec![ServerConfig::new("up", up.uri()), ServerConfig::new("down", down.uri())];

    let core = reqwest_core(config).unwrap();
    core.start().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    for _ in 0..4 {
        let response = core.get("/work").send().await.unwrap();
        assert_eq!(response.server_id.as_deref(), Some("up"));
    }
    assert!(!core.load_balancer().server("down").unwrap().is_healthy());

    core.shutdown().await;
}

/// Validates that an unreachable server surfaces as a connectivity failure
/// after the configured attempts.
#[tokio::test]
async fn test_unreachable_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = NetworkingConfiguration::with_base_endpoint(format!("http://{addr}"));
    config.retry_policy.max_attempts = 2;
    config.retry_policy.backoff_strategy = BackoffSetting::Fixed { delay: Duration::from_millis(10) };

    let core = reqwest_core(config).unwrap();
    let err = core.get("/anything").send().await.unwrap_err();

    assert_eq!(err.attempts, 2);
    assert!(matches!(err.kind(), NetworkError::NetworkUnavailable(_)));
}
