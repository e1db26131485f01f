//! Request-time proxy failures.

use axum::http::header::InvalidHeaderValue;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Error raised while forwarding a request upstream.
///
/// Converted into the hosting framework's error response by
/// [`IntoResponse`]; nothing is retried.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream URL `{url}`: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("invalid Via header value: {0}")]
    InvalidVia(#[from] InvalidHeaderValue),

    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("upstream request to {upstream} failed: {source}")]
    Upstream {
        upstream: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

impl ProxyError {
    /// Upstream transport failures are 502; a request the gateway could not
    /// even build is its own fault and renders 500.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match &self {
            ProxyError::Upstream { .. } => "Upstream request failed",
            _ => "Invalid proxy target",
        };
        (self.status(), message).into_response()
    }
}
