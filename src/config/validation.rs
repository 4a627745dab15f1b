//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits > 0, address parses)
//! - Enforce production-only requirements (session secret)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LedgerConfig → Result<(), Vec<ValidationError>>
//! - Runs after environment overrides, before config is accepted

use std::net::SocketAddr;

use crate::config::schema::{LedgerConfig, RoutePolicyConfig};

/// Minimum session secret length accepted in production.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a fully assembled configuration.
pub fn validate_config(config: &LedgerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }

    if config.limits.json_body_bytes == 0 {
        errors.push(ValidationError::new("limits.json_body_bytes", "must be greater than 0"));
    }
    if config.limits.form_body_bytes == 0 {
        errors.push(ValidationError::new("limits.form_body_bytes", "must be greater than 0"));
    }

    let rl = &config.rate_limit;
    for (name, policy) in [
        ("general", &rl.general),
        ("login", &rl.login),
        ("registration", &rl.registration),
        ("password_change", &rl.password_change),
    ] {
        validate_policy(name, policy, &mut errors);
    }
    if rl.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "rate_limit.sweep_interval_secs",
            "must be greater than 0",
        ));
    }

    if config.server.environment.is_production()
        && config.session.secret.len() < MIN_SESSION_SECRET_LEN
    {
        errors.push(ValidationError::new(
            "session.secret",
            format!("SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} bytes in production"),
        ));
    }

    if let Some(url) = &config.database.url {
        if url::Url::parse(url).is_err() {
            errors.push(ValidationError::new("database.url", "DATABASE_URL is not a valid URL"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_policy(name: &str, policy: &RoutePolicyConfig, errors: &mut Vec<ValidationError>) {
    let field = |key: &str| format!("rate_limit.{name}.{key}");

    if policy.window_secs == 0 {
        errors.push(ValidationError::new(field("window_secs"), "must be greater than 0"));
    }
    if policy.max_requests == 0 {
        errors.push(ValidationError::new(field("max_requests"), "must be greater than 0"));
    }
    if !policy.path_prefix.starts_with('/') {
        errors.push(ValidationError::new(field("path_prefix"), "must start with '/'"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Environment;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&LedgerConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = LedgerConfig::default();
        config.server.bind_address = "not-an-address".into();
        config.limits.json_body_bytes = 0;
        config.rate_limit.login.max_requests = 0;
        config.rate_limit.registration.path_prefix = "api/register".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "server.bind_address",
                "limits.json_body_bytes",
                "rate_limit.login.max_requests",
                "rate_limit.registration.path_prefix",
            ]
        );
    }

    #[test]
    fn test_production_requires_session_secret() {
        let mut config = LedgerConfig::default();
        config.server.environment = Environment::Production;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "session.secret");

        config.session.secret = "s".repeat(MIN_SESSION_SECRET_LEN);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_malformed_database_url() {
        let mut config = LedgerConfig::default();
        config.database.url = Some("no scheme here".into());
        assert!(validate_config(&config).is_err());

        config.database.url = Some("postgres://ledger@localhost/ledger".into());
        assert!(validate_config(&config).is_ok());
    }
}
