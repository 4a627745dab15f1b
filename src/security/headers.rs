//! Security response headers.
//!
//! # Responsibilities
//! - Build the content security policy for the deployment mode
//! - Attach CSP, HSTS, MIME-sniffing, XSS-filter and referrer headers to
//!   every response that passes through the layer
//!
//! # Design Decisions
//! - The header set is computed once at startup; per request it is a copy
//! - Only CSP varies by mode (`upgrade-insecure-requests` in production)
//! - Never blocks a request

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use tower::{Layer, Service};

use crate::config::{Environment, HeadersConfig, LedgerConfig};

/// HSTS value: one year, subdomains, preload-eligible.
pub const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

const FALLBACK_CSP: &str = "default-src 'self'";

/// Content security policy for the given origins and mode.
pub fn content_security_policy(origins: &HeadersConfig, environment: Environment) -> String {
    let mut directives = vec![
        "default-src 'self'".to_string(),
        "script-src 'self'".to_string(),
        format!("style-src 'self' 'unsafe-inline' {}", origins.font_css_origin),
        format!("img-src 'self' data: blob: {}", origins.storage_origin),
        format!("font-src 'self' {}", origins.font_cdn_origin),
        format!("connect-src 'self' {} ws: wss:", origins.storage_origin),
        "object-src 'none'".to_string(),
        "frame-ancestors 'self'".to_string(),
        "base-uri 'self'".to_string(),
    ];
    if environment.is_production() {
        directives.push("upgrade-insecure-requests".to_string());
    }
    directives.join("; ")
}

/// The fixed set of headers attached to every response.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl HeaderPolicy {
    pub fn from_config(config: &LedgerConfig) -> Self {
        let csp = content_security_policy(&config.headers, config.server.environment);
        let csp = HeaderValue::from_str(&csp).unwrap_or_else(|_| {
            tracing::error!("Configured CSP origins produce an invalid header; using fallback");
            HeaderValue::from_static(FALLBACK_CSP)
        });

        Self {
            headers: Arc::new(vec![
                (HeaderName::from_static("content-security-policy"), csp),
                (
                    HeaderName::from_static("strict-transport-security"),
                    HeaderValue::from_static(HSTS),
                ),
                (
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ),
                (
                    HeaderName::from_static("x-xss-protection"),
                    HeaderValue::from_static("1; mode=block"),
                ),
                (
                    HeaderName::from_static("referrer-policy"),
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ),
            ]),
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in self.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
    }
}

/// Layer that adds security headers to all responses
#[derive(Clone, Debug)]
pub struct SecurityHeadersLayer {
    policy: HeaderPolicy,
}

impl SecurityHeadersLayer {
    pub fn new(policy: HeaderPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeaders {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Middleware service that adds security headers
#[derive(Clone, Debug)]
pub struct SecurityHeaders<S> {
    inner: S,
    policy: HeaderPolicy,
}

impl<S> Service<Request> for SecurityHeaders<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let mut inner = self.inner.clone();
        let policy = self.policy.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            policy.apply(response.headers_mut());
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn app(environment: Environment) -> Router {
        let mut config = LedgerConfig::default();
        config.server.environment = environment;
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .route("/fail", get(|| async { StatusCode::UNAUTHORIZED }))
            .layer(SecurityHeadersLayer::new(HeaderPolicy::from_config(&config)))
    }

    async fn fetch(app: Router, path: &str) -> Response {
        app.oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_csp_lists_configured_origins() {
        let csp = content_security_policy(&HeadersConfig::default(), Environment::Development);
        assert!(csp.contains("img-src 'self' data: blob: https://storage.googleapis.com"));
        assert!(csp.contains("font-src 'self' https://fonts.gstatic.com"));
        assert!(csp.contains("connect-src 'self' https://storage.googleapis.com ws: wss:"));
        assert!(!csp.contains("upgrade-insecure-requests"));
    }

    #[test]
    fn test_csp_upgrades_in_production() {
        let csp = content_security_policy(&HeadersConfig::default(), Environment::Production);
        assert!(csp.ends_with("upgrade-insecure-requests"));
    }

    #[test]
    fn test_invalid_origin_falls_back() {
        let mut config = LedgerConfig::default();
        config.headers.storage_origin = "https://bad\norigin".into();
        let mut headers = HeaderMap::new();
        HeaderPolicy::from_config(&config).apply(&mut headers);
        assert_eq!(headers["content-security-policy"], FALLBACK_CSP);
    }

    #[tokio::test]
    async fn test_all_security_headers_present() {
        let response = fetch(app(Environment::Development), "/test").await;
        let headers = response.headers();

        assert_eq!(headers["strict-transport-security"], HSTS);
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
        assert!(headers.contains_key("content-security-policy"));
    }

    #[tokio::test]
    async fn test_headers_on_error_responses() {
        let response = fetch(app(Environment::Production), "/fail").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers()["content-security-policy"]
            .to_str()
            .unwrap()
            .contains("upgrade-insecure-requests"));
    }
}
