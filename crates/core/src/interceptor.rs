//! Ordered request interceptors
//!
//! Interceptors are pure `Request -> Request` transformations run in
//! registration order before anything else touches the request. They are
//! registered and removed by identity, so the same interceptor type can be
//! installed twice and each copy removed independently.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use netweave_domain::constants::HEADER_AUTHORIZATION;
use netweave_domain::{Headers, Request};
use parking_lot::RwLock;
use tracing::debug;

/// Rewrites a request before dispatch
pub trait Interceptor: Send + Sync {
    fn process(&self, request: Request) -> Request;

    /// Name used in logs
    fn name(&self) -> &str {
        "interceptor"
    }
}

/// Registration-ordered list of interceptors
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the end of the chain
    pub fn add(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Remove this exact instance. Returns whether it was registered.
    pub fn remove(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        let mut interceptors = self.interceptors.write();
        let before = interceptors.len();
        interceptors.retain(|existing| !Arc::ptr_eq(existing, interceptor));
        interceptors.len() != before
    }

    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every interceptor in order
    pub fn process(&self, request: Request) -> Request {
        // Snapshot so interceptors can't deadlock by touching the chain
        let interceptors = self.interceptors.read().clone();
        interceptors.iter().fold(request, |request, interceptor| {
            debug!(interceptor = interceptor.name(), request_id = %request.id(), "intercepting");
            interceptor.process(request)
        })
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> =
            self.interceptors.read().iter().map(|i| i.name().to_string()).collect();
        f.debug_struct("InterceptorChain").field("interceptors", &names).finish()
    }
}

/* -------------------------------------------------------------------------- */
/* Built-in interceptors */
/* -------------------------------------------------------------------------- */

/// Adds default headers the request does not already set
#[derive(Debug, Clone, Default)]
pub struct HeaderInterceptor {
    headers: Headers,
}

impl HeaderInterceptor {
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Interceptor for HeaderInterceptor {
    fn process(&self, request: Request) -> Request {
        self.headers.iter().fold(request, |request, (name, value)| {
            if request.headers().contains(name) {
                request
            } else {
                request.with_header(name, value)
            }
        })
    }

    fn name(&self) -> &str {
        "headers"
    }
}

type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Sets `Authorization: Bearer <token>` from a token source.
///
/// The source is asked on every request, so rotated tokens are picked up
/// without re-registering. When it has no token the request is left alone.
#[derive(Clone)]
pub struct BearerAuthInterceptor {
    source: TokenSource,
}

impl BearerAuthInterceptor {
    pub fn new<F>(source: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Self { source: Arc::new(source) }
    }

    /// Always the same token
    pub fn fixed(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::new(move || Some(token.clone()))
    }
}

impl Interceptor for BearerAuthInterceptor {
    fn process(&self, request: Request) -> Request {
        match (self.source)() {
            Some(token) => request.with_header(HEADER_AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn name(&self) -> &str {
        "bearer_auth"
    }
}

impl fmt::Debug for BearerAuthInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerAuthInterceptor")
    }
}

/// Sets `Authorization: Basic base64(user:password)`
#[derive(Clone)]
pub struct BasicAuthInterceptor {
    header_value: String,
}

impl BasicAuthInterceptor {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Self { header_value: format!("Basic {encoded}") }
    }
}

impl Interceptor for BasicAuthInterceptor {
    fn process(&self, request: Request) -> Request {
        request.with_header(HEADER_AUTHORIZATION, self.header_value.clone())
    }

    fn name(&self) -> &str {
        "basic_auth"
    }
}

impl fmt::Debug for BasicAuthInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BasicAuthInterceptor")
    }
}

/// Logs each request at debug level and leaves it unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn process(&self, request: Request) -> Request {
        debug!(
            request_id = %request.id(),
            method = %request.method(),
            endpoint = request.endpoint(),
            priority = %request.priority(),
            body_bytes = request.body_len(),
            "outgoing request"
        );
        request
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use netweave_domain::HttpMethod;

    use super::*;

    struct Tag(&'static str);

    impl Interceptor for Tag {
        fn process(&self, request: Request) -> Request {
            let trail = request.headers().get("X-Trail").unwrap_or_default().to_string();
            request.with_header("X-Trail", format!("{trail}{}", self.0))
        }
    }

    #[test]
    fn test_runs_in_registration_order() {
        let chain = InterceptorChain::new();
        chain.add(Arc::new(Tag("a")));
        chain.add(Arc::new(Tag("b")));
        chain.add(Arc::new(Tag("c")));

        let request = chain.process(Request::new(HttpMethod::Get, "/x"));
        assert_eq!(request.headers().get("X-Trail"), Some("abc"));
    }

    #[test]
    fn test_remove_by_identity() {
        let chain = InterceptorChain::new();
        let first: Arc<dyn Interceptor> = Arc::new(Tag("a"));
        let second: Arc<dyn Interceptor> = Arc::new(Tag("a"));
        chain.add(first.clone());
        chain.add(second.clone());

        assert!(chain.remove(&first));
        assert!(!chain.remove(&first));
        assert_eq!(chain.len(), 1);

        let request = chain.process(Request::new(HttpMethod::Get, "/x"));
        assert_eq!(request.headers().get("X-Trail"), Some("a"));
    }

    #[test]
    fn test_header_interceptor_keeps_explicit_values() {
        let interceptor = HeaderInterceptor::default().with("Accept", "application/json");
        let plain = interceptor.process(Request::new(HttpMethod::Get, "/x"));
        assert_eq!(plain.headers().get("accept"), Some("application/json"));

        let explicit = interceptor
            .process(Request::new(HttpMethod::Get, "/x").with_header("Accept", "text/plain"));
        assert_eq!(explicit.headers().get("Accept"), Some("text/plain"));
    }

    #[test]
    fn test_auth_interceptors() {
        let basic = BasicAuthInterceptor::new("Aladdin", "open sesame")
            .process(Request::new(HttpMethod::Get, "/x"));
        assert_eq!(basic.headers().get("Authorization"), Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="));

        let bearer = BearerAuthInterceptor::fixed("t0k3n").process(Request::new(HttpMethod::Get, "/x"));
        assert_eq!(bearer.headers().get("Authorization"), Some("Bearer t0k3n"));

        let anonymous = BearerAuthInterceptor::new(|| None).process(Request::new(HttpMethod::Get, "/x"));
        assert!(!anonymous.headers().contains("Authorization"));
    }
}
