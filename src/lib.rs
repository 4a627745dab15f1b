//! The Digital Ledger request security pipeline.
//!
//! Every request passes body limits, origin validation, security headers,
//! HTTPS redirection, per-route-class rate limits and input sanitization
//! before reaching an application handler; every failure is rendered by one
//! error normalizer.

pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::LedgerConfig;
pub use error::ApiError;
pub use http::{HttpServer, SecurityPipeline};
pub use lifecycle::Shutdown;
