//! Security pipeline composition.
//!
//! # Data Flow
//! ```text
//! request id → trace span
//!     → normalize_errors (terminal renderer, outermost of the stages)
//!     → body limits (declared length or buffered up to the limit, extractor cap)
//!     → origin gate → CORS
//!     → security headers
//!     → https redirect (production)
//!     → rate limits: general → login → registration → password-change
//!     → sanitize
//!     → catch panic
//!     → application router
//! ```
//!
//! # Design Decisions
//! - The stack wraps the application router as a service instead of
//!   `Router::layer`, so every stage runs before routing and sanitized
//!   paths are what the router matches on
//! - Body limits run first: an oversized request is rejected even when its
//!   origin would be rejected too
//! - Errors from any stage surface through the one normalizer
//! - Panics are caught next to the handlers, so panic responses still carry
//!   CORS and security headers

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::from_fn_with_state,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{Environment, LedgerConfig};
use crate::error::{normalize_errors, panic_response, ErrorNormalizer};
use crate::security::{
    headers::{HeaderPolicy, SecurityHeadersLayer},
    https::redirect_to_https,
    limits::{enforce_body_limits, BodyLimits},
    origin::{cors_layer, validate_origin, OriginPolicy},
    rate_limit::{rate_limit, RouteClass, RouteLimiter},
    sanitize::sanitize_request,
    store::RateLimitStore,
};

/// One limiter per route class.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    pub general: Arc<RouteLimiter>,
    pub login: Arc<RouteLimiter>,
    pub registration: Arc<RouteLimiter>,
    pub password_change: Arc<RouteLimiter>,
}

impl RateLimiters {
    pub fn from_config(config: &LedgerConfig, store: Arc<dyn RateLimitStore>) -> Self {
        let build =
            |class| Arc::new(RouteLimiter::from_config(config, class, Arc::clone(&store)));
        Self {
            general: build(RouteClass::General),
            login: build(RouteClass::Login),
            registration: build(RouteClass::Registration),
            password_change: build(RouteClass::PasswordChange),
        }
    }

    pub fn get(&self, class: RouteClass) -> &Arc<RouteLimiter> {
        match class {
            RouteClass::General => &self.general,
            RouteClass::Login => &self.login,
            RouteClass::Registration => &self.registration,
            RouteClass::PasswordChange => &self.password_change,
        }
    }
}

/// Everything the pipeline stages need, resolved once at startup.
#[derive(Debug, Clone)]
pub struct SecurityPipeline {
    environment: Environment,
    limits: BodyLimits,
    origins: OriginPolicy,
    headers: HeaderPolicy,
    limiters: Option<RateLimiters>,
}

impl SecurityPipeline {
    pub fn new(config: &LedgerConfig, store: Arc<dyn RateLimitStore>) -> Self {
        let limiters = if config.rate_limit.enabled {
            Some(RateLimiters::from_config(config, store))
        } else {
            tracing::warn!("Rate limiting disabled by configuration");
            None
        };

        Self {
            environment: config.server.environment,
            limits: BodyLimits::from_config(&config.limits),
            origins: OriginPolicy::from_config(config),
            headers: HeaderPolicy::from_config(config),
            limiters,
        }
    }

    /// Wrap `app` in the full security stack.
    pub fn apply(&self, app: Router) -> Router {
        let limiter = |class: RouteClass| {
            self.limiters
                .as_ref()
                .map(|limiters| from_fn_with_state(Arc::clone(limiters.get(class)), rate_limit))
        };

        let stack = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request_id,
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(from_fn_with_state(
                ErrorNormalizer::new(self.environment),
                normalize_errors,
            ))
            .layer(from_fn_with_state(self.limits, enforce_body_limits))
            .layer(DefaultBodyLimit::max(self.limits.max()))
            .layer(from_fn_with_state(self.origins.clone(), validate_origin))
            .layer(cors_layer(&self.origins))
            .layer(SecurityHeadersLayer::new(self.headers.clone()))
            .layer(from_fn_with_state(self.environment, redirect_to_https))
            .option_layer(limiter(RouteClass::General))
            .option_layer(limiter(RouteClass::Login))
            .option_layer(limiter(RouteClass::Registration))
            .option_layer(limiter(RouteClass::PasswordChange))
            .layer(from_fn_with_state(self.limits, sanitize_request))
            .layer(CatchPanicLayer::custom(panic_response))
            .service(app);

        Router::new().fallback_service(stack)
    }
}
