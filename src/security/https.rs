//! Plaintext-to-HTTPS redirection behind a TLS-terminating proxy.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::Environment;

/// Production only: answer `X-Forwarded-Proto: http` requests with a 301 to
/// the same host and path over HTTPS.
pub async fn redirect_to_https(
    State(environment): State<Environment>,
    request: Request,
    next: Next,
) -> Response {
    if !environment.is_production() {
        return next.run(request).await;
    }

    let plaintext = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("http"));
    if !plaintext {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()));
    let Some(host) = host else {
        return next.run(request).await;
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match HeaderValue::from_str(&format!("https://{host}{path_and_query}")) {
        Ok(location) => {
            tracing::debug!(location = ?location, "Redirecting to HTTPS");
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        Err(_) => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn app(environment: Environment) -> Router {
        Router::new()
            .route("/newsletter", get(|| async { "page" }))
            .layer(axum::middleware::from_fn_with_state(environment, redirect_to_https))
    }

    fn request(proto: Option<&str>) -> Request {
        let mut builder = Request::builder()
            .uri("/newsletter?issue=4")
            .header(header::HOST, "ledger.example");
        if let Some(proto) = proto {
            builder = builder.header("x-forwarded-proto", proto);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_production_redirects_plaintext() {
        let response = app(Environment::Production).oneshot(request(Some("http"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://ledger.example/newsletter?issue=4"
        );
    }

    #[tokio::test]
    async fn test_production_passes_https_and_direct() {
        let app = app(Environment::Production);
        let forwarded = app.clone().oneshot(request(Some("https"))).await.unwrap();
        assert_eq!(forwarded.status(), StatusCode::OK);
        let direct = app.oneshot(request(None)).await.unwrap();
        assert_eq!(direct.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_development_never_redirects() {
        let response = app(Environment::Development).oneshot(request(Some("http"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
