//! Fixed-window rate limiting per route class.
//!
//! # Responsibilities
//! - Derive the client key from the peer address (or trusted forwarded hop)
//! - Count requests per route class × client in the shared store
//! - Reject excess with `ApiError::RateLimited` before the handler runs
//! - Give back successful login attempts after the handler responds
//! - Emit `RateLimit-Limit`, `RateLimit-Remaining`, `RateLimit-Reset`
//!
//! # Design Decisions
//! - One `RouteLimiter` per class, layered general first; a request matching
//!   several prefixes is counted by each of them
//! - The narrowest limiter's headers win (inner layers set them first)
//! - Limiters wrap the handler so outcome-dependent accounting is possible

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::config::{LedgerConfig, RoutePolicyConfig};
use crate::error::ApiError;
use crate::observability::metrics;
use crate::security::store::{RateLimitStore, RatePolicy, WindowState};

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Named category of endpoints sharing one rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteClass {
    General,
    Login,
    Registration,
    PasswordChange,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::General => "general",
            RouteClass::Login => "login",
            RouteClass::Registration => "registration",
            RouteClass::PasswordChange => "password-change",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition key for counters, normally the caller's IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a request: the first `X-Forwarded-For` hop when trusted, else
    /// the peer address, else `unknown`.
    pub fn from_request(request: &Request, trust_forwarded_for: bool) -> Self {
        if trust_forwarded_for {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return Self::new(ip);
            }
        }

        match request.extensions().get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => Self::new(addr.ip().to_string()),
            None => Self::new("unknown"),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Limiter for one route class.
#[derive(Debug, Clone)]
pub struct RouteLimiter {
    class: RouteClass,
    policy: RatePolicy,
    path_prefix: String,
    skip_paths: Vec<String>,
    skip_successful: bool,
    trust_forwarded_for: bool,
    store: Arc<dyn RateLimitStore>,
}

impl RouteLimiter {
    pub fn new(
        class: RouteClass,
        policy: RatePolicy,
        path_prefix: impl Into<String>,
        store: Arc<dyn RateLimitStore>,
    ) -> Self {
        Self {
            class,
            policy,
            path_prefix: path_prefix.into(),
            skip_paths: Vec::new(),
            skip_successful: false,
            trust_forwarded_for: false,
            store,
        }
    }

    /// Build the limiter for `class` from configuration.
    ///
    /// The general class skips health paths; the login class does not count
    /// successful attempts.
    pub fn from_config(
        config: &LedgerConfig,
        class: RouteClass,
        store: Arc<dyn RateLimitStore>,
    ) -> Self {
        let rl = &config.rate_limit;
        let policy_config: &RoutePolicyConfig = match class {
            RouteClass::General => &rl.general,
            RouteClass::Login => &rl.login,
            RouteClass::Registration => &rl.registration,
            RouteClass::PasswordChange => &rl.password_change,
        };
        let policy = RatePolicy {
            window: policy_config.window(),
            max_requests: policy_config.max_requests,
        };

        let mut limiter = Self::new(class, policy, policy_config.path_prefix.clone(), store)
            .trust_forwarded_for(config.server.trust_forwarded_for);

        match class {
            RouteClass::General => limiter = limiter.skip_paths(rl.health_paths.clone()),
            RouteClass::Login => limiter = limiter.skip_successful_requests(),
            RouteClass::Registration | RouteClass::PasswordChange => {}
        }
        limiter
    }

    #[must_use]
    pub fn skip_paths(mut self, paths: Vec<String>) -> Self {
        self.skip_paths.extend(paths);
        self
    }

    #[must_use]
    pub fn skip_successful_requests(mut self) -> Self {
        self.skip_successful = true;
        self
    }

    #[must_use]
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn class(&self) -> RouteClass {
        self.class
    }

    /// Whether `path` falls under this limiter.
    pub fn applies_to(&self, path: &str) -> bool {
        if self.skip_paths.iter().any(|p| path_matches(path, p)) {
            return false;
        }
        path_matches(path, &self.path_prefix)
    }
}

/// Prefix match on path segment boundaries (`/api/login` matches
/// `/api/login` and `/api/login/x`, not `/api/loginx`).
fn path_matches(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn set_rate_limit_headers(headers: &mut HeaderMap, state: &WindowState) {
    for (name, value) in [
        (RATELIMIT_LIMIT, state.limit.to_string()),
        (RATELIMIT_REMAINING, state.remaining().to_string()),
        (RATELIMIT_RESET, state.reset_secs().to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.entry(name).or_insert(value);
        }
    }
}

/// Middleware function for one route class.
pub async fn rate_limit(
    State(limiter): State<Arc<RouteLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.applies_to(request.uri().path()) {
        return next.run(request).await;
    }

    let class = limiter.class;
    let key = ClientKey::from_request(&request, limiter.trust_forwarded_for);
    let mut state = limiter.store.increment(class, &key, &limiter.policy).await;

    if state.is_exceeded() {
        tracing::warn!(
            client = %key,
            route_class = %class,
            count = state.count,
            limit = state.limit,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(class.as_str());

        let mut response = ApiError::RateLimited(class).into_response();
        let headers = response.headers_mut();
        set_rate_limit_headers(headers, &state);
        if let Ok(value) = HeaderValue::from_str(&state.reset_secs().to_string()) {
            headers.insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    let mut response = next.run(request).await;

    if limiter.skip_successful && response.status().as_u16() < 400 {
        limiter.store.decrement(class, &key, state.window_start).await;
        state.count = state.count.saturating_sub(1);
        tracing::trace!(client = %key, route_class = %class, "Successful attempt not counted");
    }

    set_rate_limit_headers(response.headers_mut(), &state);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::error::{normalize_errors, ErrorNormalizer};
    use crate::security::clock::ManualClock;
    use crate::security::store::MemoryStore;
    use axum::{
        body::Body,
        http::StatusCode,
        routing::{get, post},
        Router,
    };
    use std::time::Duration;
    use tower::ServiceExt;

    fn limiter(
        class: RouteClass,
        max: u32,
        prefix: &str,
        store: Arc<MemoryStore>,
    ) -> RouteLimiter {
        RouteLimiter::new(
            class,
            RatePolicy {
                window: Duration::from_secs(60),
                max_requests: max,
            },
            prefix,
            store,
        )
    }

    fn layered(router: Router, limiter: RouteLimiter) -> Router {
        router.layer(axum::middleware::from_fn_with_state(Arc::new(limiter), rate_limit))
    }

    fn request(method: &str, uri: &str, ip: &str) -> Request {
        let addr: SocketAddr = format!("{ip}:40000").parse().unwrap();
        Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_path_matching() {
        assert!(path_matches("/api/login", "/api/login"));
        assert!(path_matches("/api/login/otp", "/api/login"));
        assert!(!path_matches("/api/loginx", "/api/login"));
        assert!(path_matches("/api/anything", "/api/"));
        assert!(!path_matches("/assets/app.js", "/api/"));
    }

    #[test]
    fn test_client_key_sources() {
        let req = request("GET", "/", "203.0.113.9");
        assert_eq!(ClientKey::from_request(&req, false).as_str(), "203.0.113.9");

        let req = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(ClientKey::from_request(&req, true).as_str(), "198.51.100.7");
        assert_eq!(ClientKey::from_request(&req, false).as_str(), "unknown");
    }

    #[tokio::test]
    async fn test_blocks_excess_and_sets_headers() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new())));
        let app = layered(
            Router::new().route("/api/posts", get(|| async { "ok" })),
            limiter(RouteClass::General, 2, "/api/", store),
        );

        let first = app.clone().oneshot(request("GET", "/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[&RATELIMIT_LIMIT], "2");
        assert_eq!(first.headers()[&RATELIMIT_REMAINING], "1");
        assert_eq!(first.headers()[&RATELIMIT_RESET], "60");

        app.clone().oneshot(request("GET", "/api/posts", "10.0.0.1")).await.unwrap();
        let third = app.clone().oneshot(request("GET", "/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(third.headers()[&RATELIMIT_REMAINING], "0");
        assert!(third.headers().contains_key(header::RETRY_AFTER));

        let other = app.oneshot(request("GET", "/api/posts", "10.0.0.2")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_window_reset_readmits() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let app = layered(
            Router::new().route("/api/posts", get(|| async { "ok" })),
            limiter(RouteClass::General, 1, "/api/", store),
        );

        app.clone().oneshot(request("GET", "/api/posts", "10.0.0.1")).await.unwrap();
        let blocked = app.clone().oneshot(request("GET", "/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        clock.advance(Duration::from_secs(60));
        let after = app.oneshot(request("GET", "/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(after.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_paths_skipped() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new())));
        let app = layered(
            Router::new().route("/api/health", get(|| async { "ok" })),
            limiter(RouteClass::General, 1, "/api/", store.clone())
                .skip_paths(vec!["/api/health".to_string()]),
        );

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("GET", "/api/health", "10.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_successful_logins_not_counted() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new())));
        let app = layered(
            Router::new().route(
                "/api/login",
                post(|body: String| async move {
                    if body == "good" {
                        StatusCode::OK
                    } else {
                        StatusCode::UNAUTHORIZED
                    }
                }),
            ),
            limiter(RouteClass::Login, 2, "/api/login", store).skip_successful_requests(),
        );

        let login = |body: &'static str| {
            Request::builder()
                .method("POST")
                .uri("/api/login")
                .extension(ConnectInfo("10.0.0.1:1".parse::<SocketAddr>().unwrap()))
                .body(Body::from(body))
                .unwrap()
        };

        let status = |response: Response| response.status();
        let bad = app.clone().oneshot(login("bad")).await.unwrap();
        assert_eq!(status(bad), StatusCode::UNAUTHORIZED);
        let ok = app.clone().oneshot(login("good")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[&RATELIMIT_REMAINING], "1");
        let bad = app.clone().oneshot(login("bad")).await.unwrap();
        assert_eq!(status(bad), StatusCode::UNAUTHORIZED);
        let blocked = app.oneshot(login("bad")).await.unwrap();
        assert_eq!(status(blocked), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_narrow_limiter_headers_win() {
        let store = Arc::new(MemoryStore::new(Arc::new(ManualClock::new())));
        let router = Router::new().route("/api/register", post(|| async { StatusCode::CREATED }));
        let registration = limiter(RouteClass::Registration, 3, "/api/register", store.clone());
        let router = layered(router, registration);
        let app = layered(router, limiter(RouteClass::General, 1000, "/api/", store))
            .layer(axum::middleware::from_fn_with_state(
                ErrorNormalizer::new(Environment::Production),
                normalize_errors,
            ));

        let response = app.oneshot(request("POST", "/api/register", "10.0.0.1")).await.unwrap();
        assert_eq!(response.headers()[&RATELIMIT_LIMIT], "3");
        assert_eq!(response.headers()[&RATELIMIT_REMAINING], "2");
    }
}
