//! Upstream forwarding for `P` rules.
//!
//! # Data Flow
//! ```text
//! Outcome::Proxy(rule)
//!     → forwarder.rs (substitute upstream URL, pick plain or TLS client)
//!     → upstream request (headers copied, Host dropped, Via chained)
//!     → upstream response (Via overwritten, body streamed back)
//!     → error.rs on any transport failure
//! ```
//!
//! # Design Decisions
//! - Bodies are streamed in both directions, never buffered
//! - No retries and no load balancing: one upstream per request
//! - The Via identity is resolved once at startup and injected

pub mod error;
pub mod forwarder;

pub use error::ProxyError;
pub use forwarder::{Forwarder, ViaIdentity};
