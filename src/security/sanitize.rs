//! Input sanitization for request body, query and path parameters.
//!
//! # Responsibilities
//! - Strip script blocks, `javascript:` and inline `on<event>=` handlers
//!   from every string leaf of structured input
//! - Rewrite JSON and URL-encoded bodies, the query string and path
//!   segments of the in-flight request before handlers see them
//!
//! # Design Decisions
//! - Only string values change; keys, key order and shape are preserved
//! - Untouched input is forwarded byte-for-byte
//! - Regex stripping is best-effort defense in depth. Crafted input such as
//!   split tags can reassemble after a pass; output encoding at render time
//!   is still required

use std::borrow::Cow;
use std::sync::LazyLock;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, uri::PathAndQuery, HeaderValue, Uri},
    middleware::Next,
    response::Response,
};
use regex::Regex;
use serde_json::Value;
use url::form_urlencoded;

use crate::error::ApiError;
use crate::observability::metrics;
use crate::security::limits::{BodyKind, BodyLimits};

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script pattern is valid")
});
static JAVASCRIPT_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("javascript pattern is valid"));
static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)on\w+=").expect("event handler pattern is valid"));

/// Apply the sanitization rules, in order, to one string.
pub fn sanitize_str(input: &str) -> Cow<'_, str> {
    let mut output = Cow::Borrowed(input);
    for rule in [&*SCRIPT_BLOCK, &*JAVASCRIPT_URI, &*EVENT_HANDLER] {
        let rewritten = match rule.replace_all(&output, "") {
            Cow::Owned(rewritten) => Some(rewritten),
            Cow::Borrowed(_) => None,
        };
        if let Some(rewritten) = rewritten {
            output = Cow::Owned(rewritten);
        }
    }
    output
}

/// Sanitize every string leaf in place. Returns whether anything changed.
pub fn sanitize_value(value: &mut Value) -> bool {
    match value {
        Value::String(s) => {
            let cleaned = match sanitize_str(s) {
                Cow::Owned(cleaned) => cleaned,
                Cow::Borrowed(_) => return false,
            };
            *s = cleaned;
            true
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| sanitize_value(item) | changed),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |changed, item| sanitize_value(item) | changed),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Sanitize the values of an URL-encoded string. `None` when unchanged.
pub fn sanitize_urlencoded(encoded: &str) -> Option<String> {
    let mut changed = false;
    let pairs: Vec<(String, String)> = form_urlencoded::parse(encoded.as_bytes())
        .map(|(key, value)| {
            let cleaned = match sanitize_str(&value) {
                Cow::Owned(cleaned) => Some(cleaned),
                Cow::Borrowed(_) => None,
            };
            let value = match cleaned {
                Some(cleaned) => {
                    changed = true;
                    cleaned
                }
                None => value.into_owned(),
            };
            (key.into_owned(), value)
        })
        .collect();

    changed.then(|| {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
    })
}

/// Sanitize each percent-decoded path segment. `None` when unchanged.
pub fn sanitize_path(path: &str) -> Option<String> {
    let mut changed = false;
    let segments: Vec<String> = path
        .split('/')
        .map(|segment| {
            let bytes = urlencoding::decode_binary(segment.as_bytes());
            let decoded = String::from_utf8_lossy(&bytes);
            match sanitize_str(&decoded) {
                Cow::Owned(cleaned) => {
                    changed = true;
                    urlencoding::encode(&cleaned).into_owned()
                }
                Cow::Borrowed(_) => segment.to_string(),
            }
        })
        .collect();

    changed.then(|| segments.join("/"))
}

fn sanitize_uri(uri: &Uri) -> Option<Uri> {
    let path = sanitize_path(uri.path());
    let query = uri.query().and_then(sanitize_urlencoded);
    if path.is_none() && query.is_none() {
        return None;
    }
    if path.is_some() {
        metrics::record_sanitized("params");
    }
    if query.is_some() {
        metrics::record_sanitized("query");
    }

    let path = path.unwrap_or_else(|| uri.path().to_string());
    let rebuilt = match query.as_deref().or(uri.query()) {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path,
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(rebuilt).ok()?);
    Uri::from_parts(parts).ok()
}

fn sanitize_body_bytes(kind: BodyKind, bytes: &Bytes) -> Option<Bytes> {
    match kind {
        BodyKind::Json => {
            let mut value: Value = serde_json::from_slice(bytes).ok()?;
            if !sanitize_value(&mut value) {
                return None;
            }
            serde_json::to_vec(&value).ok().map(Bytes::from)
        }
        BodyKind::Form => {
            let text = std::str::from_utf8(bytes).ok()?;
            sanitize_urlencoded(text).map(Bytes::from)
        }
        BodyKind::Other => None,
    }
}

/// Middleware rewriting body, query and path parameters of the request.
pub async fn sanitize_request(
    State(limits): State<BodyLimits>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    if let Some(uri) = sanitize_uri(&parts.uri) {
        tracing::debug!(original = %parts.uri, "Sanitized request URI");
        parts.uri = uri;
    }

    let kind = BodyKind::of(&parts.headers);
    let body = if kind == BodyKind::Other {
        body
    } else {
        let limit = limits.limit_for(kind);
        let bytes = axum::body::to_bytes(body, limit).await.map_err(|err| {
            tracing::debug!(error = %err, "Failed to buffer request body");
            ApiError::PayloadTooLarge { limit }
        })?;

        match sanitize_body_bytes(kind, &bytes) {
            Some(cleaned) => {
                metrics::record_sanitized("body");
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(cleaned.len()));
                Body::from(cleaned)
            }
            None => Body::from(bytes),
        }
    };

    Ok(next.run(Request::from_parts(parts, body)).await)
}
