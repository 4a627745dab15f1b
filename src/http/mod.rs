//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection (ConnectInfo<SocketAddr>)
//!     → pipeline.rs (security stages, in order)
//!     → routes.rs (application handlers)
//!         → validation.rs (validated JSON extraction)
//!     → error normalizer renders any failure
//! ```

pub mod pipeline;
pub mod routes;
pub mod server;
pub mod validation;

pub use pipeline::SecurityPipeline;
pub use routes::{router, AppState};
pub use server::HttpServer;
pub use validation::ValidatedJson;
