//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, tracing, timeout)
//!     → middleware/rewrite.rs (evaluate rules)
//!         → 410 / 403 / redirect written directly
//!         → proxy::Forwarder for `P` rules
//!         → next stage (static files or caller-supplied router)
//!     → Send to client
//! ```

pub mod middleware;
pub mod server;

pub use middleware::{RewriteError, RewriteState};
pub use server::HttpServer;
