//! Shared test helpers for `netweave-core` integration tests.
//!
//! A scripted transport that records every attempt, an analytics sink that
//! keeps every event, and a configuration tuned for fast tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netweave_core::{
    AnalyticsSink, NetworkCore, StreamResponse, Transport, TransportRequest, TransportResponse,
};
use netweave_domain::{
    BackoffSetting, EventMetadata, NetworkError, NetworkEvent, NetworkResult,
    NetworkingConfiguration,
};

pub const BASE: &str = "https://api.test";

/// What the transport does for one attempt
#[derive(Debug, Clone)]
pub struct Outcome {
    result: Result<TransportResponse, NetworkError>,
    delay: Duration,
}

impl Outcome {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::respond(TransportResponse::new(200, body))
    }

    pub fn status(status: u16) -> Self {
        Self::respond(TransportResponse::new(status, format!("status {status}")))
    }

    pub fn respond(response: TransportResponse) -> Self {
        Self { result: Ok(response), delay: Duration::ZERO }
    }

    pub fn fail(error: NetworkError) -> Self {
        Self { result: Err(error), delay: Duration::ZERO }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Transport double. Outcomes come from, in order: a route for the request
/// path, the next scripted outcome, the fallback.
pub struct MockTransport {
    routes: Mutex<HashMap<String, Outcome>>,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    requests: Mutex<Vec<TransportRequest>>,
    stream_chunk: usize,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::with_fallback(Outcome::ok("ok"))
    }

    pub fn with_fallback(fallback: Outcome) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            requests: Mutex::new(Vec::new()),
            stream_chunk: 3,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn route(&self, path: &str, outcome: Outcome) {
        self.routes.lock().unwrap().insert(path.to_string(), outcome);
    }

    pub fn then(&self, outcome: Outcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> TransportRequest {
        self.requests().pop().expect("at least one request")
    }

    /// Request paths in the order they reached the transport
    pub fn paths(&self) -> Vec<String> {
        self.requests().iter().map(|r| r.url.path().to_string()).collect()
    }

    fn next_outcome(&self, request: &TransportRequest) -> Outcome {
        if let Some(outcome) = self.routes.lock().unwrap().get(request.url.path()) {
            return outcome.clone();
        }
        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            return outcome;
        }
        self.fallback.lock().unwrap().clone()
    }

    async fn exchange(&self, request: TransportRequest) -> NetworkResult<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome(&request);
        self.requests.lock().unwrap().push(request);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !outcome.delay.is_zero() {
            tokio::time::sleep(outcome.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome.result
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> NetworkResult<TransportResponse> {
        self.exchange(request).await
    }

    async fn open_stream(&self, request: TransportRequest) -> NetworkResult<StreamResponse> {
        let response = self.exchange(request).await?;
        let chunks: Vec<NetworkResult<Vec<u8>>> =
            response.body.chunks(self.stream_chunk).map(|c| Ok(c.to_vec())).collect();
        Ok(StreamResponse {
            status: response.status,
            headers: response.headers,
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }
}

/// Keeps every analytics event
#[derive(Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<(NetworkEvent, EventMetadata)>>,
}

impl RecordingAnalytics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(NetworkEvent, EventMetadata)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: NetworkEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|(e, _)| *e == event).count()
    }
}

impl AnalyticsSink for RecordingAnalytics {
    fn track_event(&self, event: NetworkEvent, metadata: EventMetadata) {
        self.events.lock().unwrap().push((event, metadata));
    }
}

/// Base endpoint, one attempt, short fixed backoff
pub fn test_config() -> NetworkingConfiguration {
    let mut config = NetworkingConfiguration::with_base_endpoint(BASE);
    config.retry_policy.max_attempts = 1;
    config.retry_policy.backoff_strategy = BackoffSetting::Fixed { delay: Duration::from_millis(10) };
    config
}

pub fn core(transport: &Arc<MockTransport>, config: NetworkingConfiguration) -> NetworkCore {
    NetworkCore::builder(transport.clone())
        .configuration(config)
        .build()
        .expect("valid test configuration")
}
