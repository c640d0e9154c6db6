//! Integration tests for the request pipeline
//!
//! Drives `NetworkCore` against the scripted transport in `support` and
//! checks what reaches the wire, what callers see, and what the breaker,
//! cache, monitor and analytics record along the way.

mod support;

use std::sync::Arc;
use std::time::Duration;

use netweave_common::compression::{self, CompressionAlgorithm};
use netweave_common::resilience::{CircuitState, MockClock};
use netweave_core::{Interceptor, NetworkCore, TransportResponse};
use netweave_domain::constants::{HEADER_ACCEPT_ENCODING, HEADER_CONTENT_ENCODING, HEADER_REQUEST_ID};
use netweave_domain::{
    CachePolicy, HttpMethod, NetworkError, NetworkEvent, Request, SecurityLevel, ServerConfig,
};
use support::{core, test_config, MockTransport, Outcome, RecordingAnalytics};
use tokio_util::sync::CancellationToken;

fn compressible(len: usize) -> Vec<u8> {
    b"payload ".iter().copied().cycle().take(len).collect()
}

/// Validates that the breaker opens after the failure threshold and then
/// refuses calls without touching the transport.
///
/// # Test Steps
/// 1. Five 500 responses, one attempt each
/// 2. The sixth call fails fast with `CircuitOpen` and a retry hint
/// 3. The transport saw exactly five calls
#[tokio::test]
async fn test_breaker_opens_after_threshold() {
    let transport = MockTransport::with_fallback(Outcome::status(500));
    let analytics = RecordingAnalytics::new();
    let core = NetworkCore::builder(transport.clone())
        .configuration(test_config())
        .analytics(analytics.clone())
        .build()
        .unwrap();

    for _ in 0..5 {
        let err = core.post("/flaky").send().await.unwrap_err();
        assert_eq!(err.kind().status(), Some(500));
        assert_eq!(err.attempts, 1);
    }
    assert_eq!(core.circuit_breaker_status("/flaky"), CircuitState::Open);

    let err = core.post("/flaky").send().await.unwrap_err();
    match err.kind() {
        NetworkError::CircuitOpen { endpoint, retry_after } => {
            assert_eq!(endpoint, "/flaky");
            assert!(retry_after.is_some());
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(err.attempts, 0);
    assert_eq!(transport.calls(), 5);
    assert_eq!(analytics.count(NetworkEvent::CircuitOpened), 1);

    // other endpoints are unaffected
    transport.route("/healthy", Outcome::ok("fine"));
    assert!(core.post("/healthy").send().await.is_ok());
}

/// Validates half-open recovery once the open timeout has passed.
///
/// # Test Steps
/// 1. Open the circuit with a mock clock
/// 2. Advance past the open timeout and let the probe succeed
/// 3. The circuit is closed again
#[tokio::test]
async fn test_half_open_probe_closes_circuit() {
    let clock = MockClock::new();
    let transport = MockTransport::with_fallback(Outcome::status(503));
    let mut config = test_config();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.open_timeout = Duration::from_secs(30);
    let core = NetworkCore::builder(transport.clone())
        .configuration(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    for _ in 0..2 {
        core.delete("/jobs/1").send().await.unwrap_err();
    }
    assert_eq!(core.circuit_breaker_status("/jobs/1"), CircuitState::Open);

    clock.advance(Duration::from_secs(10));
    assert!(matches!(
        core.delete("/jobs/1").send().await.unwrap_err().kind(),
        NetworkError::CircuitOpen { .. }
    ));

    clock.advance(Duration::from_secs(20));
    transport.set_fallback(Outcome::ok("deleted"));
    let response = core.delete("/jobs/1").send().await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(core.circuit_breaker_status("/jobs/1"), CircuitState::Closed);
    assert_eq!(transport.calls(), 3);
}

/// Validates that an open circuit stays open across `configure` and follows
/// the new open timeout.
///
/// # Test Steps
/// 1. Open `/flaky` with five 500 responses
/// 2. Reconfigure with only the open timeout changed (60s -> 120s)
/// 3. The next call fails fast without reaching the transport
/// 4. After 60s it is still refused; after 120s a trial call goes through
#[tokio::test]
async fn test_open_circuit_survives_configure() {
    let clock = MockClock::new();
    let transport = MockTransport::with_fallback(Outcome::status(500));
    let mut config = test_config();
    config.circuit_breaker.open_timeout = Duration::from_secs(60);
    let core = NetworkCore::builder(transport.clone())
        .configuration(config.clone())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    for _ in 0..5 {
        core.post("/flaky").send().await.unwrap_err();
    }
    assert_eq!(core.circuit_breaker_status("/flaky"), CircuitState::Open);

    config.circuit_breaker.open_timeout = Duration::from_secs(120);
    core.configure(config).await.unwrap();
    assert_eq!(core.circuit_breaker_status("/flaky"), CircuitState::Open);

    let err = core.post("/flaky").send().await.unwrap_err();
    assert!(matches!(err.kind(), NetworkError::CircuitOpen { .. }));
    assert_eq!(transport.calls(), 5);

    clock.advance(Duration::from_secs(60));
    assert!(matches!(
        core.post("/flaky").send().await.unwrap_err().kind(),
        NetworkError::CircuitOpen { .. }
    ));
    assert_eq!(transport.calls(), 5);

    clock.advance(Duration::from_secs(60));
    transport.set_fallback(Outcome::ok("back"));
    core.post("/flaky").send().await.unwrap();
    assert_eq!(core.circuit_breaker_status("/flaky"), CircuitState::Closed);
    assert_eq!(transport.calls(), 6);
}

/// Validates that transient failures are retried up to `maxAttempts` in
/// total and no further.
#[tokio::test(start_paused = true)]
async fn test_retry_bound() {
    let transport = MockTransport::with_fallback(Outcome::status(503));
    let analytics = RecordingAnalytics::new();
    let mut config = test_config();
    config.retry_policy.max_attempts = 3;
    let core = NetworkCore::builder(transport.clone())
        .configuration(config)
        .analytics(analytics.clone())
        .build()
        .unwrap();

    let err = core.put("/orders/7").body("{}").send().await.unwrap_err();
    assert_eq!(err.attempts, 3);
    assert_eq!(err.kind().status(), Some(503));
    assert_eq!(transport.calls(), 3);
    assert_eq!(analytics.count(NetworkEvent::RetryScheduled), 2);
    assert_eq!(core.metrics().retries, 2);
}

/// Validates recovery on a later attempt and that client errors are not
/// retried.
#[tokio::test(start_paused = true)]
async fn test_retry_recovers_and_skips_client_errors() {
    let transport = MockTransport::new();
    let mut config = test_config();
    config.retry_policy.max_attempts = 3;
    let core = core(&transport, config);

    transport.then(Outcome::fail(NetworkError::NetworkUnavailable("reset".into())));
    transport.then(Outcome::ok("second time"));
    let response = core.post("/submit").send().await.unwrap();
    assert_eq!(response.attempts, 2);
    assert_eq!(response.body, b"second time");

    transport.then(Outcome::status(404));
    let err = core.post("/missing").send().await.unwrap_err();
    assert_eq!(err.attempts, 1);
    assert_eq!(transport.calls(), 3);
}

/// Validates that an attempt exceeding its deadline times out and is
/// retried.
#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_retried() {
    let transport = MockTransport::with_fallback(Outcome::ok("late").after(Duration::from_secs(5)));
    let mut config = test_config();
    config.retry_policy.max_attempts = 2;
    let core = core(&transport, config);

    let err = core.post("/slow").timeout(Duration::from_millis(50)).send().await.unwrap_err();
    assert!(matches!(err.kind(), NetworkError::Timeout(d) if *d == Duration::from_millis(50)));
    assert_eq!(err.attempts, 2);
    assert_eq!(transport.calls(), 2);
}

/// Validates the cache round trip, policy overrides and TTL expiry.
///
/// # Test Steps
/// 1. GET twice; the second is served from cache with no transport call
/// 2. `Bypass` and POST always reach the transport
/// 3. After the default TTL the entry is gone
/// 4. `clear_cache` drops matching entries
#[tokio::test]
async fn test_cache_round_trip() {
    let clock = MockClock::new();
    let transport = MockTransport::with_fallback(Outcome::ok("[1,2,3]"));
    let core = NetworkCore::builder(transport.clone())
        .configuration(test_config())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    let first = core.get("/users").send().await.unwrap();
    assert!(!first.from_cache);
    let second = core.get("/users").send().await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.body, first.body);
    assert_eq!(second.attempts, 0);
    assert_ne!(second.request_id, first.request_id);
    assert_eq!(transport.calls(), 1);

    core.get("/users").cache_policy(CachePolicy::Bypass).send().await.unwrap();
    core.post("/users").send().await.unwrap();
    assert_eq!(transport.calls(), 3);

    clock.advance(Duration::from_secs(301));
    assert!(!core.get("/users").send().await.unwrap().from_cache);
    assert_eq!(transport.calls(), 4);

    let metrics = core.metrics();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_misses, 2);

    assert_eq!(core.clear_cache(Some("^GET /users")), 1);
    assert!(!core.get("/users").send().await.unwrap().from_cache);
}

/// Validates that a per-request TTL overrides the default and that failures
/// are never cached.
#[tokio::test]
async fn test_cache_ttl_override_and_failures() {
    let clock = MockClock::new();
    let transport = MockTransport::new();
    let core = NetworkCore::builder(transport.clone())
        .configuration(test_config())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    core.get("/short").cache_policy(CachePolicy::Ttl(Duration::from_secs(5))).send().await.unwrap();
    clock.advance(Duration::from_secs(5));
    assert!(!core.get("/short").send().await.unwrap().from_cache);

    transport.route("/broken", Outcome::status(404));
    core.get("/broken").send().await.unwrap_err();
    core.get("/broken").send().await.unwrap_err();
    assert_eq!(transport.paths().iter().filter(|p| *p == "/broken").count(), 2);
}

/// Validates that cancelling one request leaves concurrent requests and the
/// endpoint's breaker untouched.
///
/// # Test Steps
/// 1. Start two slow requests, cancel one after 100ms
/// 2. The cancelled one reports `Cancelled`; the other succeeds
/// 3. No breaker failure is recorded for the cancelled endpoint
/// 4. A request whose token is already cancelled never reaches the transport
#[tokio::test(start_paused = true)]
async fn test_cancellation_isolation() {
    let transport = MockTransport::with_fallback(Outcome::ok("done").after(Duration::from_secs(1)));
    let core = core(&transport, test_config());
    let token = CancellationToken::new();

    let cancelled = Request::new(HttpMethod::Post, "/a");
    let other = Request::new(HttpMethod::Post, "/b");
    let (a, b, _) = tokio::join!(
        core.execute_with_cancellation(cancelled, &token),
        core.execute(other),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        }
    );

    let err = a.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts, 1);
    assert_eq!(b.unwrap().body, b"done");

    let breaker = core.circuit_breaker_metrics("/a").unwrap();
    assert_eq!(breaker.total_failures, 0);
    assert_eq!(core.circuit_breaker_status("/a"), CircuitState::Closed);
    assert_eq!(core.metrics().cancellations, 1);

    let calls = transport.calls();
    let err = core.execute_with_cancellation(Request::new(HttpMethod::Post, "/c"), &token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts, 0);
    assert_eq!(transport.calls(), calls);
}

/// Validates that batch results come back in input order with per-request
/// outcomes.
#[tokio::test]
async fn test_batch_preserves_order() {
    let transport = MockTransport::new();
    transport.route("/one", Outcome::ok("1").after(Duration::from_millis(30)));
    transport.route("/two", Outcome::status(404));
    transport.route("/three", Outcome::ok("3"));
    let core = core(&transport, test_config());

    let requests = ["/one", "/two", "/three"]
        .into_iter()
        .map(|path| Request::new(HttpMethod::Post, path))
        .collect();
    let results = core.batch(requests, 2).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().body, b"1");
    assert_eq!(results[1].as_ref().unwrap_err().endpoint, "/two");
    assert_eq!(results[2].as_ref().unwrap().body, b"3");
}

/// Validates that dropping a batch stops its remaining work and frees the
/// pooled connection it held.
///
/// # Test Steps
/// 1. Four 100ms requests, one at a time
/// 2. Give up on the batch after 50ms
/// 3. Long after, only the first request ever reached the transport
#[tokio::test(start_paused = true)]
async fn test_dropped_batch_stops_work() {
    let transport = MockTransport::with_fallback(Outcome::ok("ok").after(Duration::from_millis(100)));
    let core = core(&transport, test_config());

    let requests = (0..4).map(|i| Request::new(HttpMethod::Post, format!("/slow/{i}"))).collect();
    let outcome = tokio::time::timeout(Duration::from_millis(50), core.batch(requests, 1)).await;
    assert!(outcome.is_err());
    assert_eq!(transport.calls(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(transport.calls(), 1);
    assert_eq!(core.connection_stats(support::BASE).unwrap().leased, 0);
}

/// Validates outgoing body compression and the negotiation headers.
#[tokio::test]
async fn test_request_body_compression() {
    let transport = MockTransport::new();
    let core = core(&transport, test_config());

    let body = compressible(4096);
    core.post("/upload").body(body.clone()).send().await.unwrap();
    let sent = transport.last_request();
    assert_eq!(sent.headers.get(HEADER_CONTENT_ENCODING), Some("gzip"));
    assert_eq!(sent.headers.get(HEADER_ACCEPT_ENCODING), Some("deflate, gzip"));
    assert!(sent.headers.contains(HEADER_REQUEST_ID));
    let wire = sent.body.unwrap();
    assert!(wire.len() < body.len());
    assert_eq!(compression::decompress(CompressionAlgorithm::Gzip, &wire).unwrap(), body);

    core.post("/upload").body(compressible(100)).send().await.unwrap();
    let sent = transport.last_request();
    assert!(!sent.headers.contains(HEADER_CONTENT_ENCODING));
    assert_eq!(sent.body.unwrap(), compressible(100));

    assert_eq!(core.metrics().bytes_sent, wire.len() as u64 + 100);
}

/// Validates that compressed responses are decoded before callers see them.
#[tokio::test]
async fn test_response_body_decoded() {
    let transport = MockTransport::new();
    let plain = compressible(2048);
    let zipped = compression::compress(CompressionAlgorithm::Gzip, &plain, 6).unwrap();
    transport.route(
        "/report",
        Outcome::respond(TransportResponse::new(200, zipped).with_header("Content-Encoding", "gzip")),
    );
    transport.route(
        "/odd",
        Outcome::respond(TransportResponse::new(200, "x").with_header("Content-Encoding", "br")),
    );
    let core = core(&transport, test_config());

    let response = core.get("/report").send().await.unwrap();
    assert_eq!(response.body, plain);
    assert_eq!(response.header(HEADER_CONTENT_ENCODING), None);

    let err = core.get("/odd").send().await.unwrap_err();
    assert!(matches!(err.kind(), NetworkError::Decoding(_)));
}

struct Tag(&'static str);

impl Interceptor for Tag {
    fn process(&self, request: Request) -> Request {
        let trail = match request.headers().get("X-Trail") {
            Some(existing) => format!("{existing},{}", self.0),
            None => self.0.to_string(),
        };
        request.with_header("X-Trail", trail)
    }
}

/// Validates that interceptors run in registration order and can be removed
/// by identity.
#[tokio::test]
async fn test_interceptors_run_in_order() {
    let transport = MockTransport::new();
    let core = core(&transport, test_config());
    let first: Arc<dyn Interceptor> = Arc::new(Tag("first"));
    let second: Arc<dyn Interceptor> = Arc::new(Tag("second"));
    core.add_interceptor(first.clone());
    core.add_interceptor(second.clone());

    core.post("/echo").send().await.unwrap();
    assert_eq!(transport.last_request().headers.get("X-Trail"), Some("first,second"));

    assert!(core.remove_interceptor(&first));
    assert!(!core.remove_interceptor(&first));
    core.post("/echo").send().await.unwrap();
    assert_eq!(transport.last_request().headers.get("X-Trail"), Some("second"));
}

/// Validates round-robin distribution across configured servers and that
/// explicit bases bypass the balancer.
#[tokio::test]
async fn test_round_robin_servers() {
    let transport = MockTransport::new();
    let mut config = test_config();
    config.cache_policy.enabled = false;
    config.load_balancing.servers = vec![
        ServerConfig::new("a", "https://a.test"),
        ServerConfig::new("b", "https://b.test"),
        ServerConfig::new("c", "https://c.test"),
    ];
    let core = core(&transport, config);

    let mut served = Vec::new();
    for _ in 0..5 {
        served.push(core.get("/items").send().await.unwrap().server_id.unwrap());
    }
    assert_eq!(served, ["a", "b", "c", "a", "b"]);
    let hosts: Vec<String> =
        transport.requests().iter().map(|r| r.url.host_str().unwrap().to_string()).collect();
    assert_eq!(hosts, ["a.test", "b.test", "c.test", "a.test", "b.test"]);

    let response = core.get("https://other.test/items").send().await.unwrap();
    assert_eq!(response.server_id, None);
    assert_eq!(transport.last_request().url.as_str(), "https://other.test/items");

    core.get("/items").base_override("https://pinned.test").send().await.unwrap();
    assert_eq!(transport.last_request().url.host_str(), Some("pinned.test"));
}

/// Validates that unhealthy servers are skipped and that no healthy server
/// is a local refusal.
#[tokio::test]
async fn test_unhealthy_servers_skipped() {
    let transport = MockTransport::new();
    let mut config = test_config();
    config.cache_policy.enabled = false;
    config.load_balancing.servers =
        vec![ServerConfig::new("a", "https://a.test"), ServerConfig::new("b", "https://b.test")];
    let core = core(&transport, config);

    core.load_balancer().set_health("a", false);
    for _ in 0..3 {
        assert_eq!(core.get("/x").send().await.unwrap().server_id.as_deref(), Some("b"));
    }

    core.load_balancer().set_health("b", false);
    let err = core.get("/x").send().await.unwrap_err();
    assert!(matches!(err.kind(), NetworkError::NoServerAvailable));
    assert_eq!(core.circuit_breaker_metrics("/x").unwrap().total_failures, 0);
}

/// Validates security refusals before dispatch and the https requirement of
/// the strict level.
#[tokio::test]
async fn test_security_checks() {
    let transport = MockTransport::new();
    let core = core(&transport, test_config());

    let err = core.get("/x").header("X-Injected", "a\r\nb").send().await.unwrap_err();
    assert!(matches!(err.kind(), NetworkError::Security(_)));
    assert_eq!(err.attempts, 0);
    assert_eq!(transport.calls(), 0);

    let mut strict = support::test_config();
    strict.security.level = SecurityLevel::Strict;
    strict.base_endpoint = Some("http://plain.test".into());
    assert!(matches!(core.configure(strict.clone()).await, Err(NetworkError::Security(_))));

    strict.base_endpoint = Some(support::BASE.into());
    core.configure(strict).await.unwrap();
    let err = core.get("http://plain.test/x").send().await.unwrap_err();
    assert!(matches!(err.kind(), NetworkError::Security(_)));
}

/// Validates that a relative endpoint with nowhere to resolve against fails
/// locally.
#[tokio::test]
async fn test_relative_endpoint_without_base() {
    let transport = MockTransport::new();
    let core = core(&transport, netweave_domain::NetworkingConfiguration::default());

    let err = core.get("/nowhere").send().await.unwrap_err();
    assert!(matches!(err.kind(), NetworkError::InvalidEndpoint(_)));
    assert_eq!(transport.calls(), 0);
}

/// Validates that reconfiguration reaches the cache and retry policy.
#[tokio::test(start_paused = true)]
async fn test_configure_applies_to_components() {
    let transport = MockTransport::new();
    let core = core(&transport, test_config());

    let mut config = test_config();
    config.cache_policy.enabled = false;
    config.retry_policy.max_attempts = 2;
    core.configure(config.clone()).await.unwrap();
    assert_eq!(core.configuration(), config);

    core.get("/a").send().await.unwrap();
    core.get("/a").send().await.unwrap();
    assert_eq!(transport.calls(), 2);

    transport.set_fallback(Outcome::status(502));
    assert_eq!(core.get("/b").send().await.unwrap_err().attempts, 2);

    let mut invalid = test_config();
    invalid.retry_policy.max_attempts = 0;
    assert!(matches!(core.configure(invalid).await, Err(NetworkError::Config(_))));
    assert_eq!(core.configuration(), config);
}

/// Validates the monitor snapshot and the analytics event stream.
#[tokio::test]
async fn test_metrics_and_events() {
    let transport = MockTransport::new();
    transport.route("/missing", Outcome::status(404));
    let analytics = RecordingAnalytics::new();
    let core = NetworkCore::builder(transport.clone())
        .configuration(test_config())
        .analytics(analytics.clone())
        .build()
        .unwrap();
    let mut updates = core.subscribe_metrics();

    core.post("/ok").send().await.unwrap();
    core.post("/ok").send().await.unwrap();
    core.post("/missing").send().await.unwrap_err();

    let metrics = core.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.successes, 2);
    assert_eq!(metrics.failures, 1);
    assert_eq!(metrics.endpoints["/ok"].requests, 2);
    assert_eq!(metrics.endpoints["/missing"].failures, 1);
    assert!(metrics.p50_latency.is_some());

    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().total_requests, 3);

    assert_eq!(analytics.count(NetworkEvent::RequestStarted), 3);
    assert_eq!(analytics.count(NetworkEvent::RequestCompleted), 2);
    let failed: Vec<_> = analytics
        .events()
        .into_iter()
        .filter(|(event, _)| *event == NetworkEvent::RequestFailed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].1.get("failure_class"), Some("client_error"));
}

/// Validates that a custom backoff replaces the configured one.
#[tokio::test(start_paused = true)]
async fn test_custom_backoff() {
    let transport = MockTransport::with_fallback(Outcome::status(503));
    let mut config = test_config();
    config.retry_policy.max_attempts = 3;
    let core = core(&transport, config);
    core.set_backoff(Some(netweave_common::resilience::BackoffStrategy::custom(|attempt| {
        Duration::from_secs(u64::from(attempt) + 1)
    })))
    .unwrap();

    let started = tokio::time::Instant::now();
    core.post("/x").send().await.unwrap_err();
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}
