//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (reject oversized bodies)
//!     → origin.rs (gate disallowed origins, CORS headers, preflight)
//!     → headers.rs (CSP, HSTS and friends on the way out)
//!     → https.rs (production plaintext redirect)
//!     → rate_limit.rs + store.rs (per-client, per-route-class windows)
//!     → sanitize.rs (strip script vectors from body, query, path)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - Each stage is an independent middleware; `http::pipeline` orders them

pub mod clock;
pub mod headers;
pub mod https;
pub mod limits;
pub mod origin;
pub mod rate_limit;
pub mod sanitize;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::{HeaderPolicy, SecurityHeadersLayer};
pub use limits::{BodyKind, BodyLimits};
pub use origin::{OriginDecision, OriginPolicy};
pub use rate_limit::{ClientKey, RouteClass, RouteLimiter};
pub use store::{spawn_sweeper, MemoryStore, RateLimitStore, RatePolicy, WindowState};
