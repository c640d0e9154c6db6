//! Outgoing request model
//!
//! A [`Request`] is immutable once built. Interceptors and the pipeline
//! transform it with the consuming `with_*` methods, which hand back a new
//! value and leave the identity and creation time untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use netweave_common::impl_token_conversions;
use netweave_common::utils::Fingerprint;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::http::{Headers, HttpMethod};
use crate::errors::{NetworkError, NetworkResult};

/* -------------------------------------------------------------------------- */
/* Priority */
/* -------------------------------------------------------------------------- */

/// Dispatch priority, ordered `Low < Normal < High < Critical`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl_token_conversions!(Priority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Critical => "critical",
});

/* -------------------------------------------------------------------------- */
/* Cache policy */
/* -------------------------------------------------------------------------- */

/// How a single request interacts with the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Read and write with the configured default TTL
    #[default]
    Default,
    /// Read and write, storing with this TTL
    Ttl(Duration),
    /// Skip the lookup but store the fresh response
    Refresh,
    /// Neither read nor write
    Bypass,
}

impl CachePolicy {
    /// May a cached response satisfy this request
    pub fn allows_read(self) -> bool {
        matches!(self, Self::Default | Self::Ttl(_))
    }

    /// May the response be written back
    pub fn allows_write(self) -> bool {
        !matches!(self, Self::Bypass)
    }

    /// TTL override carried by the policy
    pub fn ttl(self) -> Option<Duration> {
        match self {
            Self::Ttl(ttl) => Some(ttl),
            _ => None,
        }
    }
}

/* -------------------------------------------------------------------------- */
/* Request */
/* -------------------------------------------------------------------------- */

/// An HTTP request as seen by the networking core
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    id: Uuid,
    method: HttpMethod,
    endpoint: String,
    base_override: Option<String>,
    query: Vec<(String, String)>,
    headers: Headers,
    body: Option<Vec<u8>>,
    priority: Priority,
    cache_policy: CachePolicy,
    timeout: Option<Duration>,
    created_at: DateTime<Utc>,
}

impl Request {
    /// New request with a fresh time-ordered id
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            method,
            endpoint: endpoint.into(),
            base_override: None,
            query: Vec::new(),
            headers: Headers::new(),
            body: None,
            priority: Priority::default(),
            cache_policy: CachePolicy::default(),
            timeout: None,
            created_at: Utc::now(),
        }
    }

    /// Start a builder
    pub fn builder(method: HttpMethod, endpoint: impl Into<String>) -> RequestBuilder {
        RequestBuilder { request: Self::new(method, endpoint) }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Path or absolute URL this request targets
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn base_override(&self) -> Option<&str> {
        self.base_override.as_deref()
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Per-request deadline, overriding the configured timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Body length in bytes
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Send to this base URL instead of asking the load balancer
    pub fn with_base_override(mut self, base: impl Into<String>) -> Self {
        self.base_override = Some(base.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the endpoint is a full URL rather than a path
    pub fn is_absolute(&self) -> bool {
        Url::parse(&self.endpoint).is_ok()
    }

    /// Resolve the target URL against `base`.
    ///
    /// An absolute endpoint ignores `base`; the base override, when present,
    /// wins over `base`. Query parameters are appended in insertion order.
    pub fn resolve_url(&self, base: Option<&str>) -> NetworkResult<Url> {
        let mut url = match Url::parse(&self.endpoint) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_override.as_deref().or(base).ok_or_else(|| {
                    NetworkError::InvalidEndpoint(format!(
                        "relative endpoint {} without a base URL",
                        self.endpoint
                    ))
                })?;
                join_base(base, &self.endpoint)?
            }
            Err(err) => return Err(err.into()),
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(NetworkError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }

    /// Fingerprint of the query parameters and body, independent of query
    /// ordering
    pub fn payload_fingerprint(&self) -> String {
        let mut query: Vec<&(String, String)> = self.query.iter().collect();
        query.sort();

        let mut fingerprint = Fingerprint::new();
        for (name, value) in query {
            fingerprint.update(name.as_bytes()).update(value.as_bytes());
        }
        fingerprint.update(self.body.as_deref().unwrap_or_default());
        fingerprint.finish_hex()
    }
}

fn join_base(base: &str, endpoint: &str) -> NetworkResult<Url> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(endpoint.trim_start_matches('/'))?)
}

/// Fluent construction of a [`Request`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request = self.request.with_header(name, value);
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request = self.request.with_query(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request = self.request.with_body(body);
        self
    }

    /// Serialize `value` as the JSON body and set `Content-Type`
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> NetworkResult<Self> {
        let body =
            serde_json::to_vec(value).map_err(|e| NetworkError::Encoding(e.to_string()))?;
        Ok(self.header(crate::constants::HEADER_CONTENT_TYPE, "application/json").body(body))
    }

    pub fn base_override(mut self, base: impl Into<String>) -> Self {
        self.request = self.request.with_base_override(base);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.request.priority = priority;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.cache_policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!("CRITICAL".parse::<Priority>(), Ok(Priority::Critical));
    }

    #[test]
    fn test_transformations_keep_identity() {
        let request = Request::new(HttpMethod::Get, "/users");
        let id = request.id();
        let created = request.created_at();

        let changed = request.with_header("X-Trace", "1").with_priority(Priority::High);
        assert_eq!(changed.id(), id);
        assert_eq!(changed.created_at(), created);
        assert_eq!(changed.headers().get("x-trace"), Some("1"));
        assert_eq!(changed.priority(), Priority::High);
    }

    #[test]
    fn test_resolve_relative_against_base() {
        let request = Request::builder(HttpMethod::Get, "/v1/users")
            .query("page", "2")
            .query("q", "a b")
            .build();
        let url = request.resolve_url(Some("https://api.test/root")).unwrap();
        assert_eq!(url.as_str(), "https://api.test/root/v1/users?page=2&q=a+b");
    }

    #[test]
    fn test_resolve_prefers_override_and_absolute() {
        let request = Request::new(HttpMethod::Get, "status").with_base_override("http://b.test");
        assert_eq!(
            request.resolve_url(Some("http://a.test")).unwrap().as_str(),
            "http://b.test/status"
        );

        let absolute = Request::new(HttpMethod::Get, "https://c.test/x");
        assert!(absolute.is_absolute());
        assert_eq!(absolute.resolve_url(Some("http://a.test")).unwrap().host_str(), Some("c.test"));
    }

    #[test]
    fn test_resolve_errors() {
        let relative = Request::new(HttpMethod::Get, "/x");
        assert!(matches!(relative.resolve_url(None), Err(NetworkError::InvalidEndpoint(_))));

        let ftp = Request::new(HttpMethod::Get, "ftp://files.test/x");
        assert!(matches!(ftp.resolve_url(None), Err(NetworkError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_payload_fingerprint_ignores_query_order() {
        let a = Request::new(HttpMethod::Get, "/s").with_query("a", "1").with_query("b", "2");
        let b = Request::new(HttpMethod::Get, "/s").with_query("b", "2").with_query("a", "1");
        let c = Request::new(HttpMethod::Get, "/s").with_query("a", "1").with_query("b", "3");
        assert_eq!(a.payload_fingerprint(), b.payload_fingerprint());
        assert_ne!(a.payload_fingerprint(), c.payload_fingerprint());
    }

    #[test]
    fn test_cache_policy_flags() {
        assert!(CachePolicy::Default.allows_read());
        assert!(CachePolicy::Ttl(Duration::from_secs(1)).allows_write());
        assert!(!CachePolicy::Refresh.allows_read());
        assert!(CachePolicy::Refresh.allows_write());
        assert!(!CachePolicy::Bypass.allows_write());
        assert_eq!(CachePolicy::Ttl(Duration::from_secs(9)).ttl(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn test_json_builder_sets_content_type() {
        let request = Request::builder(HttpMethod::Post, "/items")
            .json(&serde_json::json!({"name": "widget"}))
            .unwrap()
            .build();
        assert_eq!(request.headers().get("content-type"), Some("application/json"));
        assert_eq!(request.body(), Some(br#"{"name":"widget"}"#.as_slice()));
    }
}
