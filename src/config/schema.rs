//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the ledger gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LedgerConfig {
    /// Listener and deployment mode settings.
    pub server: ServerConfig,

    /// Cross-origin allowlist sources.
    pub cors: CorsConfig,

    /// Request body size limits.
    pub limits: LimitsConfig,

    /// Content security policy sources.
    pub headers: HeadersConfig,

    /// Per route class rate limits.
    pub rate_limit: RateLimitConfig,

    /// Session settings consumed by the auth integration.
    pub session: SessionConfig,

    /// Database settings consumed by the persistence layer.
    pub database: DatabaseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Deployment mode, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    /// Interpret a `NODE_ENV` style value. Only the exact string
    /// `production` is production.
    pub fn from_node_env(value: &str) -> Self {
        if value == "production" {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    pub bind_address: String,

    /// Production or development.
    pub environment: Environment,

    /// Use the first `X-Forwarded-For` hop as the client address.
    /// Enable only behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            environment: Environment::Development,
            trust_forwarded_for: false,
        }
    }
}

/// Origin allowlist sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Explicit allowed origins (`ALLOWED_ORIGINS`).
    pub allowed_origins: Vec<String>,

    /// Platform-provided hosts (`REPLIT_DOMAINS`), expanded to `https://<host>`.
    pub platform_domains: Vec<String>,

    /// Fixed local development entries, always part of the allowlist.
    pub dev_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            platform_domains: Vec::new(),
            dev_origins: vec![
                "http://localhost:5000".to_string(),
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:5000".to_string(),
            ],
        }
    }
}

/// Request body limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum JSON body size in bytes.
    pub json_body_bytes: usize,

    /// Maximum URL-encoded body size in bytes.
    pub form_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            json_body_bytes: 10 * 1024 * 1024, // 10MB
            form_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// External origins admitted by the content security policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Object storage origin (images, uploads).
    pub storage_origin: String,

    /// Font stylesheet origin.
    pub font_css_origin: String,

    /// Font file CDN origin.
    pub font_cdn_origin: String,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            storage_origin: "https://storage.googleapis.com".to_string(),
            font_css_origin: "https://fonts.googleapis.com".to_string(),
            font_cdn_origin: "https://fonts.gstatic.com".to_string(),
        }
    }
}

/// Fixed-window policy for one route class.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutePolicyConfig {
    /// Path prefix the class applies to.
    pub path_prefix: String,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Requests admitted per window.
    pub max_requests: u32,
}

impl RoutePolicyConfig {
    fn new(path_prefix: &str, window_secs: u64, max_requests: u32) -> Self {
        Self {
            path_prefix: path_prefix.to_string(),
            window_secs,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    pub general: RoutePolicyConfig,
    pub login: RoutePolicyConfig,
    pub registration: RoutePolicyConfig,
    pub password_change: RoutePolicyConfig,

    /// Paths exempt from the general limiter.
    pub health_paths: Vec<String>,

    /// Interval between sweeps of expired windows, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            general: RoutePolicyConfig::new("/api/", 15 * 60, 1000),
            login: RoutePolicyConfig::new("/api/login", 15 * 60, 5),
            registration: RoutePolicyConfig::new("/api/register", 60 * 60, 3),
            password_change: RoutePolicyConfig::new("/api/auth/change-password", 15 * 60, 5),
            health_paths: vec!["/api/health".to_string(), "/health".to_string()],
            sweep_interval_secs: 60,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Secret used to sign session cookies (`SESSION_SECRET`).
    pub secret: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (`DATABASE_URL`).
    pub url: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
