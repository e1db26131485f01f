//! Request pipeline middleware.

pub mod rewrite;

pub use rewrite::{rewrite_middleware, RewriteError, RewriteState};
