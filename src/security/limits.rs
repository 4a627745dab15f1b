//! Request body size limits.
//!
//! # Responsibilities
//! - Pick the body limit for the request's content type
//! - Reject an oversized body before any parsing, origin check or rate
//!   limiting
//!
//! # Design Decisions
//! - A declared `Content-Length` is checked without touching the body
//! - A body without a declared length is buffered here, up to the limit, so
//!   later stages only ever see a bounded body
//! - Return 413 Payload Too Large through the error normalizer

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::config::LimitsConfig;
use crate::error::ApiError;
use crate::observability::metrics;

/// How a request body is encoded, as far as the pipeline cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    Other,
}

impl BodyKind {
    pub fn of(headers: &HeaderMap) -> Self {
        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        else {
            return BodyKind::Other;
        };

        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/json" || essence.ends_with("+json") {
            BodyKind::Json
        } else if essence == "application/x-www-form-urlencoded" {
            BodyKind::Form
        } else {
            BodyKind::Other
        }
    }
}

/// Per-encoding body limits.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    pub json: usize,
    pub form: usize,
}

impl BodyLimits {
    pub fn from_config(config: &LimitsConfig) -> Self {
        Self {
            json: config.json_body_bytes,
            form: config.form_body_bytes,
        }
    }

    pub fn max(&self) -> usize {
        self.json.max(self.form)
    }

    pub fn limit_for(&self, kind: BodyKind) -> usize {
        match kind {
            BodyKind::Json => self.json,
            BodyKind::Form => self.form,
            BodyKind::Other => self.max(),
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn too_large(limit: usize, path: &str, length: Option<u64>) -> ApiError {
    tracing::warn!(length, limit, path = %path, "Request body too large");
    metrics::record_rejected("payload_too_large");
    ApiError::PayloadTooLarge { limit }
}

/// Middleware rejecting oversized bodies, declared or streamed.
pub async fn enforce_body_limits(
    State(limits): State<BodyLimits>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = limits.limit_for(BodyKind::of(request.headers()));

    match declared_length(request.headers()) {
        Some(length) if length > limit as u64 => {
            Err(too_large(limit, request.uri().path(), Some(length)))
        }
        Some(_) => Ok(next.run(request).await),
        None => {
            let (parts, body) = request.into_parts();
            let bytes = axum::body::to_bytes(body, limit).await.map_err(|err| {
                tracing::debug!(error = %err, "Failed to buffer undeclared body");
                too_large(limit, parts.uri.path(), None)
            })?;
            Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderValue, StatusCode},
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    const MB: usize = 1024 * 1024;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_body_kind_detection() {
        assert_eq!(BodyKind::of(&headers("application/json")), BodyKind::Json);
        assert_eq!(BodyKind::of(&headers("Application/JSON; charset=utf-8")), BodyKind::Json);
        assert_eq!(BodyKind::of(&headers("application/merge-patch+json")), BodyKind::Json);
        assert_eq!(
            BodyKind::of(&headers("application/x-www-form-urlencoded")),
            BodyKind::Form
        );
        assert_eq!(BodyKind::of(&headers("text/plain")), BodyKind::Other);
        assert_eq!(BodyKind::of(&HeaderMap::new()), BodyKind::Other);
    }

    #[test]
    fn test_limit_selection() {
        let limits = BodyLimits { json: 10 * MB, form: 2 * MB };
        assert_eq!(limits.limit_for(BodyKind::Json), 10 * MB);
        assert_eq!(limits.limit_for(BodyKind::Form), 2 * MB);
        assert_eq!(limits.limit_for(BodyKind::Other), 10 * MB);
    }

    fn app() -> Router {
        Router::new()
            .route("/api/upload", post(|body: String| async move { body.len().to_string() }))
            .layer(axum::middleware::from_fn_with_state(
                BodyLimits::from_config(&LimitsConfig::default()),
                enforce_body_limits,
            ))
    }

    #[tokio::test]
    async fn test_declared_oversize_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, (11 * MB).to_string())
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_within_limit_passes() {
        let body = vec![b'a'; 1024];
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(header::CONTENT_LENGTH, body.len().to_string())
            .body(Body::from(body))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_undeclared_oversize_rejected_while_buffering() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(vec![b'a'; 11 * MB]))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_undeclared_within_limit_forwarded_intact() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(vec![b'a'; 4096]))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"4096");
    }
}
