//! Application routes protected by the security pipeline.
//!
//! # Responsibilities
//! - Health probe
//! - Newsletter subscription
//! - Identity-provider callback, login and registration
//! - Password change endpoint (delegated to the identity provider)

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::error::ApiError;
use crate::http::validation::ValidatedJson;
use crate::identity::{upsert_oauth_user, IdentityError, NewUser, OAuthClaims, User, UserStore};

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/health", get(health))
        .route("/api/newsletter/subscribe", post(subscribe))
        .route("/api/auth/callback", post(auth_callback))
        .route("/api/login", post(login))
        .route("/api/register", post(register))
        .route("/api/auth/change-password", post(change_password))
        .with_state(state)
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        let status = match err {
            IdentityError::EmailTaken(_) => StatusCode::CONFLICT,
            IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        ApiError::with_status(status, err.to_string())
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubscribeRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Subscriber {
    pub email: String,
    pub name: Option<String>,
}

async fn subscribe(
    ValidatedJson(req): ValidatedJson<SubscribeRequest>,
) -> (StatusCode, Json<Subscriber>) {
    tracing::info!("Newsletter subscription received");
    (
        StatusCode::CREATED,
        Json(Subscriber {
            email: req.email,
            name: req.name,
        }),
    )
}

#[derive(Debug, Deserialize, Validate)]
pub struct CallbackRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub sub: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[validate(url(message = "must be a valid URL"))]
    pub profile_image_url: Option<String>,
}

async fn auth_callback(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CallbackRequest>,
) -> Result<Json<User>, ApiError> {
    let claims = OAuthClaims {
        sub: req.sub,
        email: req.email,
        first_name: req.first_name,
        last_name: req.last_name,
        profile_image_url: req.profile_image_url,
    };
    let user = upsert_oauth_user(state.users.as_ref(), claims).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<User>, ApiError> {
    match state.users.get_user_by_email(&req.email).await {
        Some(user) => Ok(Json(user)),
        None => Err(ApiError::with_status(StatusCode::UNAUTHORIZED, "Invalid credentials")),
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub first_name: Option<String>,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub last_name: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state
        .users
        .create_user(NewUser {
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            ..Default::default()
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn change_password() -> ApiError {
    ApiError::with_status(
        StatusCode::NOT_IMPLEMENTED,
        "Password changes are handled by the identity provider",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryUserStore;
    use axum::{body::Body, extract::Request};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(Arc::new(MemoryUserStore::new())))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let app = app();
        let registered = app
            .clone()
            .oneshot(post_json("/api/register", json!({"email": "ada@example.com"})))
            .await
            .unwrap();
        assert_eq!(registered.status(), StatusCode::CREATED);

        let again = app
            .clone()
            .oneshot(post_json("/api/register", json!({"email": "ada@example.com"})))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let login = app
            .clone()
            .oneshot(post_json("/api/login", json!({"email": "ada@example.com"})))
            .await
            .unwrap();
        assert_eq!(login.status(), StatusCode::OK);

        let unknown = app
            .oneshot(post_json("/api/login", json!({"email": "bob@example.com"})))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_change_password_not_implemented() {
        let response = app()
            .oneshot(post_json("/api/auth/change-password", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
