//! Error taxonomy and the terminal error normalizer.
//!
//! # Responsibilities
//! - Define every error the pipeline or a handler can raise (`ApiError`)
//! - Render errors into the client-visible JSON shape exactly once
//! - Keep internal messages and stacks out of production responses
//!
//! # Design Decisions
//! - `ApiError::into_response` only tags the response with an `ErrorReport`
//!   and a production-safe body; the `normalize_errors` middleware renders
//!   the final body for the configured mode
//! - Field-level validation errors are returned verbatim in every mode
//! - Panics are converted into `Unhandled` by `panic_response`
//! - Untagged 4xx/5xx responses that are not already JSON (router 404/405,
//!   extractor rejections) get a report built from their status

use std::any::Any;
use std::backtrace::Backtrace;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::config::Environment;
use crate::observability::metrics;
use crate::security::limits::BodyKind;
use crate::security::rate_limit::RouteClass;

/// Message returned for every non-429 error in production.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred. Please try again later.";

/// Message returned for 429 errors in production.
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests, please try again later.";

/// Message heading a validation failure.
pub const VALIDATION_FAILED_MESSAGE: &str = "Validation failed";

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by pipeline stages and application handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Origin '{origin}' is not allowed by CORS")]
    OriginRejected { origin: String },

    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("Too many {0} requests from this client, please try again later.")]
    RateLimited(RouteClass),

    #[error("Validation failed")]
    ValidationFailed(Vec<FieldError>),

    #[error("{message}")]
    Unhandled {
        status: Option<StatusCode>,
        message: String,
        stack: Option<String>,
    },
}

impl ApiError {
    /// An internal failure with no explicit status. Captures a backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Unhandled {
            status: None,
            message: message.into(),
            stack: Some(Backtrace::force_capture().to_string()),
        }
    }

    /// A handler error carrying its own status code.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError::Unhandled {
            status: Some(status),
            message: message.into(),
            stack: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::OriginRejected { .. } => StatusCode::FORBIDDEN,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::Unhandled { status, .. } => {
                status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn report(&self) -> ErrorReport {
        let (stack, errors) = match self {
            ApiError::Unhandled { stack, .. } => (stack.clone(), None),
            ApiError::ValidationFailed(errors) => (None, Some(errors.clone())),
            _ => (None, None),
        };

        ErrorReport {
            status: self.status(),
            message: self.to_string(),
            stack,
            errors,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Unhandled {
            status: None,
            message: err.to_string(),
            // Debug output carries the cause chain (and backtrace when enabled).
            stack: Some(format!("{err:?}")),
        }
    }
}

/// Everything the normalizer needs to render an error, carried in the
/// response extensions between the raising stage and the terminal layer.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub message: String,
    pub stack: Option<String>,
    pub errors: Option<Vec<FieldError>>,
}

impl ErrorReport {
    /// Report for an error response no stage tagged, named by its status.
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status,
            message: status.canonical_reason().unwrap_or("Request failed").to_string(),
            stack: None,
            errors: None,
        }
    }
}

/// Client-visible error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report();
        // Production rendering is the default so an un-normalized response
        // never leaks details.
        let mut response = ErrorNormalizer::new(Environment::Production).render(&report);
        response.extensions_mut().insert(report);
        response
    }
}

/// Renders `ErrorReport`s according to the environment mode.
#[derive(Debug, Clone, Copy)]
pub struct ErrorNormalizer {
    environment: Environment,
}

impl ErrorNormalizer {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn body(&self, report: &ErrorReport) -> ErrorBody {
        if let Some(errors) = &report.errors {
            return ErrorBody {
                message: VALIDATION_FAILED_MESSAGE.to_string(),
                errors: Some(errors.clone()),
                stack: None,
            };
        }

        if self.environment.is_production() {
            let message = if report.status == StatusCode::TOO_MANY_REQUESTS {
                TOO_MANY_REQUESTS_MESSAGE
            } else {
                GENERIC_ERROR_MESSAGE
            };
            ErrorBody {
                message: message.to_string(),
                errors: None,
                stack: None,
            }
        } else {
            ErrorBody {
                message: report.message.clone(),
                errors: None,
                stack: report.stack.clone(),
            }
        }
    }

    pub fn render(&self, report: &ErrorReport) -> Response {
        (report.status, Json(self.body(report))).into_response()
    }
}

/// Terminal middleware: re-renders any tagged error response for the
/// configured mode, keeping the headers earlier stages attached.
pub async fn normalize_errors(
    State(normalizer): State<ErrorNormalizer>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;

    let report = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => report,
        None if is_untagged_failure(&response) => ErrorReport::from_status(response.status()),
        None => return response,
    };

    if report.status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            status = report.status.as_u16(),
            error = %report.message,
            "Request failed"
        );
    } else {
        tracing::debug!(
            method = %method,
            path = %path,
            status = report.status.as_u16(),
            error = %report.message,
            "Request rejected"
        );
    }
    metrics::record_error(report.status.as_u16());

    let (mut parts, _) = response.into_parts();
    let rendered = normalizer.render(&report);
    let (rendered_parts, body) = rendered.into_parts();

    parts.status = rendered_parts.status;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    Response::from_parts(parts, body)
}

fn is_untagged_failure(response: &Response) -> bool {
    let status = response.status();
    (status.is_client_error() || status.is_server_error())
        && BodyKind::of(response.headers()) != BodyKind::Json
}

/// Converts a caught panic into an `Unhandled` error response.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    ApiError::internal(format!("Handler panicked: {detail}")).into_response()
}
