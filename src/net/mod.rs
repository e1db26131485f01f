//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake via axum-server + rustls)
//!     → Hand off to HTTP layer, flagged as encrypted
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently
//! - Whether a connection was encrypted is the listener's knowledge; the
//!   rewrite middleware only receives the flag

pub mod tls;

pub use tls::load_tls_config;
