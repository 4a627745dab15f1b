//! Cross-origin request validation.
//!
//! # Responsibilities
//! - Assemble the origin allowlist at startup
//! - Decide allow/deny for the request's `Origin`
//! - Reject disallowed origins before any further processing (gate)
//! - Emit credentialed CORS headers and answer preflights (`cors_layer`)
//!
//! # Design Decisions
//! - Requests without `Origin` are non-browser clients and always pass
//! - Production matches allowlist entries by substring containment
//! - Development falls back to allowing unknown origins; the fallback is
//!   logged so it shows up when testing against a dev server
//! - Gate and CORS layer share one `OriginPolicy`, so they cannot disagree

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, request::Parts, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::{Environment, LedgerConfig};
use crate::error::ApiError;
use crate::observability::metrics;
use crate::security::rate_limit::{RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};

/// Preflight cache lifetime.
pub const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86_400);

const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Outcome of an origin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginDecision {
    /// No `Origin` header.
    NoOrigin,
    /// Origin is local or allowlisted.
    Allowed,
    /// Origin is unknown but the development fallback admits it.
    AllowedPermissive,
    Denied,
}

impl OriginDecision {
    pub fn is_allowed(self) -> bool {
        self != OriginDecision::Denied
    }
}

/// Immutable origin allowlist plus the mode it is enforced in.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    environment: Environment,
    allowlist: Arc<Vec<String>>,
}

impl OriginPolicy {
    pub fn new(environment: Environment, allowlist: Vec<String>) -> Self {
        // An empty entry would be contained in every origin.
        let allowlist = allowlist
            .into_iter()
            .map(|entry| entry.trim().trim_end_matches('/').to_string())
            .filter(|entry| !entry.is_empty())
            .collect();

        Self {
            environment,
            allowlist: Arc::new(allowlist),
        }
    }

    /// Allowlist from explicit origins, platform domains (as `https://`
    /// origins) and the fixed development entries.
    pub fn from_config(config: &LedgerConfig) -> Self {
        let cors = &config.cors;
        let mut allowlist = cors.allowed_origins.clone();
        allowlist.extend(
            cors.platform_domains
                .iter()
                .map(|domain| format!("https://{}", domain.trim())),
        );
        allowlist.extend(cors.dev_origins.iter().cloned());

        let policy = Self::new(config.server.environment, allowlist);
        tracing::info!(
            environment = ?policy.environment,
            entries = policy.allowlist.len(),
            "Origin allowlist assembled"
        );
        policy
    }

    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    fn is_listed(&self, origin: &str) -> bool {
        self.allowlist.iter().any(|entry| origin.contains(entry.as_str()))
    }

    pub fn decide(&self, origin: Option<&str>) -> OriginDecision {
        let Some(origin) = origin else {
            return OriginDecision::NoOrigin;
        };

        if self.environment.is_production() {
            if self.is_listed(origin) {
                OriginDecision::Allowed
            } else {
                OriginDecision::Denied
            }
        } else if origin.contains("localhost") || self.is_listed(origin) {
            OriginDecision::Allowed
        } else {
            OriginDecision::AllowedPermissive
        }
    }
}

/// Gate middleware: rejects disallowed origins with `ApiError::OriginRejected`.
pub async fn validate_origin(
    State(policy): State<OriginPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

    match policy.decide(origin.as_deref()) {
        OriginDecision::Denied => {
            let origin = origin.unwrap_or_default();
            tracing::warn!(origin = %origin, path = %request.uri().path(), "Origin rejected");
            metrics::record_rejected("origin");
            return ApiError::OriginRejected { origin }.into_response();
        }
        OriginDecision::AllowedPermissive => {
            tracing::debug!(
                origin = origin.as_deref().unwrap_or_default(),
                "Unlisted origin admitted outside production"
            );
        }
        OriginDecision::Allowed | OriginDecision::NoOrigin => {}
    }

    next.run(request).await
}

/// CORS response headers and preflight handling for admitted origins.
pub fn cors_layer(policy: &OriginPolicy) -> CorsLayer {
    let policy = policy.clone();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|o| policy.decide(Some(o)).is_allowed())
                    .unwrap_or(false)
            },
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            X_REQUESTED_WITH,
            header::ACCEPT,
            header::ORIGIN,
            X_REQUEST_ID,
        ])
        .expose_headers([RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET, X_REQUEST_ID])
        .max_age(PREFLIGHT_MAX_AGE)
}
