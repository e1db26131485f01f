//! Rule-driven URL rewrite gateway.
//!
//! Requests pass through an ordered list of rewrite directives before they
//! reach the next stage. A directive may rewrite the URL in place, answer
//! with a redirect, refuse the request (403/410), or forward it to an
//! upstream named by the rewritten URL.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod rewrite;

pub use config::GatewayConfig;
pub use error::Error;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use rewrite::RuleSet;
