//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (overlay NODE_ENV, ALLOWED_ORIGINS, REPLIT_DOMAINS, ...)
//!     → validation.rs (semantic checks)
//!     → LedgerConfig (validated, immutable)
//!     → shared by the pipeline builder at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the allowlist never changes at runtime
//! - All fields have defaults to allow minimal configs
//! - Environment variables win over file values
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CorsConfig, Environment, HeadersConfig, LedgerConfig, LimitsConfig, RateLimitConfig,
    RoutePolicyConfig, ServerConfig,
};
