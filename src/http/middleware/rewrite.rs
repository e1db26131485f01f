//! Rewrite middleware.
//! Runs the rule set in front of the next pipeline stage.

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{CONTENT_TYPE, HOST, LOCATION},
        uri::{InvalidUri, InvalidUriParts, PathAndQuery},
        HeaderValue, Request, StatusCode, Uri,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::proxy::Forwarder;
use crate::rewrite::{evaluate, Evaluation, Outcome, RequestContext, RuleSet, Scheme};

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// State shared by every request passing through the middleware.
#[derive(Clone)]
pub struct RewriteState {
    pub rules: RuleSet,
    pub forwarder: Forwarder,
    /// Whether the listener in front of this middleware terminates TLS.
    pub encrypted: bool,
}

/// A rewrite produced a URL that cannot be put back on the request.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewritten URL `{url}` is not a valid request target: {source}")]
    InvalidTarget {
        url: String,
        #[source]
        source: InvalidUri,
    },

    #[error("rewritten URL `{url}` cannot be combined with the request URI: {source}")]
    InvalidParts {
        url: String,
        #[source]
        source: InvalidUriParts,
    },

    #[error("redirect location `{0}` is not a valid header value")]
    InvalidLocation(String),
}

impl IntoResponse for RewriteError {
    fn into_response(self) -> Response {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

pub async fn rewrite_middleware(
    State(state): State<RewriteState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = request_context(&req, state.encrypted);
    let Evaluation {
        outcome,
        url,
        content_type,
        query,
    } = evaluate(&state.rules, &ctx);

    let mut response = match outcome {
        Outcome::Gone => {
            tracing::info!(url = %ctx.url(), "Rule responded 410 Gone");
            StatusCode::GONE.into_response()
        }
        Outcome::Forbidden => {
            tracing::info!(url = %ctx.url(), "Rule responded 403 Forbidden");
            StatusCode::FORBIDDEN.into_response()
        }
        Outcome::Redirect { status, location } => {
            tracing::info!(url = %ctx.url(), status = %status, location = %location, "Rule redirected");
            match HeaderValue::try_from(location.as_str()) {
                Ok(value) => (status, [(LOCATION, value)]).into_response(),
                Err(_) => fail(RewriteError::InvalidLocation(location)),
            }
        }
        Outcome::Proxy(rule) => match state.forwarder.forward(rule, &url, req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(url = %url, directive = rule.directive(), error = %e, "Proxy failed");
                e.into_response()
            }
        },
        Outcome::Continue => match set_url(&mut req, &url) {
            Ok(()) => {
                if let Some(query) = query {
                    req.extensions_mut().insert(query);
                }
                next.run(req).await
            }
            Err(e) => fail(e),
        },
    };

    if let Some(content_type) = content_type {
        response.headers_mut().entry(CONTENT_TYPE).or_insert(content_type);
    }

    response
}

fn fail(err: RewriteError) -> Response {
    tracing::error!(error = %err, "Rewrite failed");
    err.into_response()
}

/// Build the evaluator's view of `req`.
///
/// The Host header wins; HTTP/2 requests fall back to the URI authority.
fn request_context(req: &Request<Body>, encrypted: bool) -> RequestContext {
    let url = req
        .uri()
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");

    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .unwrap_or("");

    let forwarded_proto = req
        .headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok());

    RequestContext::new(url, host, Scheme::detect(encrypted, forwarded_proto))
}

/// Replace the path and query of the request URI with `url`.
fn set_url(req: &mut Request<Body>, url: &str) -> Result<(), RewriteError> {
    if req.uri().path_and_query().map(PathAndQuery::as_str) == Some(url) {
        return Ok(());
    }

    // Origin-form targets always start with a slash.
    let target = if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{}", url)
    };

    let path_and_query = PathAndQuery::try_from(target).map_err(|source| RewriteError::InvalidTarget {
        url: url.to_string(),
        source,
    })?;

    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    *req.uri_mut() = Uri::from_parts(parts).map_err(|source| RewriteError::InvalidParts {
        url: url.to_string(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(HOST, "example.com")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_request_context_from_headers() {
        let ctx = request_context(&request("/a?b=1"), false);
        assert_eq!(ctx.url(), "/a?b=1");
        assert_eq!(ctx.host(), "example.com");
        assert_eq!(ctx.scheme(), Scheme::Http);

        let mut req = request("/a");
        req.headers_mut()
            .insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        assert_eq!(request_context(&req, false).scheme(), Scheme::Https);
        assert_eq!(request_context(&request("/a"), true).scheme(), Scheme::Https);
    }

    #[test]
    fn test_request_context_authority_fallback() {
        let req = Request::builder()
            .uri("https://h2.example.com/x")
            .body(Body::empty())
            .unwrap();
        let ctx = request_context(&req, true);
        assert_eq!(ctx.host(), "h2.example.com");
        assert_eq!(ctx.url(), "/x");

        let req = Request::builder().uri("/x").body(Body::empty()).unwrap();
        assert_eq!(request_context(&req, false).host(), "");
    }

    #[test]
    fn test_set_url_replaces_path_and_query() {
        let mut req = request("/old?x=1");
        set_url(&mut req, "/new/path?y=2").unwrap();
        assert_eq!(req.uri().path(), "/new/path");
        assert_eq!(req.uri().query(), Some("y=2"));
    }

    #[test]
    fn test_set_url_keeps_absolute_form() {
        let mut req = Request::builder()
            .uri("http://example.com/old")
            .body(Body::empty())
            .unwrap();
        set_url(&mut req, "index.html").unwrap();
        assert_eq!(req.uri(), "http://example.com/index.html");
    }

    #[test]
    fn test_set_url_rejects_invalid_target() {
        let mut req = request("/old");
        let err = set_url(&mut req, "/bad path").unwrap_err();
        assert!(matches!(err, RewriteError::InvalidTarget { .. }));
    }
}
