//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{Environment, LedgerConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, overlay the process
/// environment, then validate.
pub fn load_config(path: Option<&Path>) -> Result<LedgerConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => LedgerConfig::default(),
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment variables onto a parsed configuration.
///
/// `lookup` abstracts the environment so the overlay is testable.
pub fn apply_env_overrides<F>(mut config: LedgerConfig, lookup: F) -> LedgerConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = lookup("NODE_ENV") {
        config.server.environment = Environment::from_node_env(&mode);
    }

    if let Some(origins) = lookup("ALLOWED_ORIGINS") {
        config.cors.allowed_origins.extend(split_list(&origins));
    }

    if let Some(domains) = lookup("REPLIT_DOMAINS") {
        config.cors.platform_domains.extend(split_list(&domains));
    }

    if let Some(secret) = lookup("SESSION_SECRET") {
        config.session.secret = secret;
    }

    if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
        config.database.url = Some(url);
    }

    if let Some(port) = lookup("PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
        let host = config
            .server
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind_address = format!("{host}:{port}");
    }

    config
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
