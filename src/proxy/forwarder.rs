//! Streaming HTTP forwarder.
//!
//! # Responsibilities
//! - Compute the upstream URL from the rule substitution
//! - Copy method and headers, drop `Host`, chain `Via`
//! - Send over the plain or TLS client depending on the upstream scheme
//! - Stream the upstream response back with this hop's `Via`

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::http::header::{HOST, VIA};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, Uri};
use http_body_util::BodyExt;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls::{ClientConfig, RootCertStore};

use crate::proxy::error::ProxyError;
use crate::rewrite::Rule;

/// Protocol token of this hop in the `Via` header.
const VIA_PROTOCOL: &str = "1.1";

/// The `"<protocol> <host>"` fragment this gateway appends to `Via`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaIdentity(String);

impl ViaIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `"1.1 <hostname>"` for the machine this process runs on.
    pub fn from_hostname() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self(format!("{} {}", VIA_PROTOCOL, host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append this hop to an existing `Via` chain.
    pub fn chain(&self, existing: Option<&str>) -> String {
        match existing {
            Some(prev) if !prev.trim().is_empty() => format!("{}, {}", prev.trim(), self.0),
            _ => self.0.clone(),
        }
    }
}

/// Outbound transport chosen from the upstream scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Plain,
    Tls,
}

/// Forwards requests to the upstream produced by a proxy rule.
#[derive(Clone)]
pub struct Forwarder {
    plain: Client<HttpConnector, Body>,
    tls: Client<HttpsConnector<HttpConnector>, Body>,
    via: ViaIdentity,
}

impl Forwarder {
    /// Build both outbound clients. Only fails if the TLS stack cannot be set up.
    pub fn new(via: ViaIdentity, connect_timeout: Duration) -> Result<Self, rustls::Error> {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(connect_timeout));
        http.set_nodelay(true);

        let plain = Client::builder(TokioExecutor::new()).build(http.clone());

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        http.enforce_http(false);
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_only()
            .enable_http1()
            .wrap_connector(http);
        let tls = Client::builder(TokioExecutor::new()).build(https);

        Ok(Self { plain, tls, via })
    }

    pub fn via(&self) -> &ViaIdentity {
        &self.via
    }

    /// Forward `request` to the upstream named by `rule`.
    ///
    /// `url` is the request URL the rule matched, after every earlier
    /// rewrite; the substitution is applied to it as is. Transport errors
    /// on either leg come back as `ProxyError`; the caller renders them.
    pub async fn forward(
        &self,
        rule: &Rule,
        url: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = request.into_parts();
        let upstream = rule.substitute(url).into_owned();
        let (uri, transport) = upstream_target(&upstream)?;

        let via = HeaderValue::try_from(self.via.chain(inbound_via(&parts.headers).as_deref()))?;

        let body = if body.is_end_stream() {
            Body::empty()
        } else {
            let upstream = upstream.clone();
            Body::new(body.map_err(move |e| {
                tracing::warn!(upstream = %upstream, error = %e, "Inbound request stream failed");
                e
            }))
        };

        let outbound = outbound_request(parts.method, &parts.headers, uri, via.clone(), body)?;

        tracing::debug!(
            upstream = %upstream,
            transport = ?transport,
            via = ?via,
            "Forwarding request"
        );

        let result = match transport {
            Transport::Plain => self.plain.request(outbound).await,
            Transport::Tls => self.tls.request(outbound).await,
        };

        let response = result.map_err(|source| ProxyError::Upstream {
            upstream: upstream.clone(),
            source,
        })?;

        tracing::debug!(upstream = %upstream, status = %response.status(), "Upstream responded");

        let (mut parts, body) = response.into_parts();
        parts.headers.insert(VIA, via);

        let body = body.map_err(move |e| {
            tracing::error!(upstream = %upstream, error = %e, "Upstream response stream failed");
            e
        });

        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Parse the substituted URL; only absolute http and https targets are accepted.
fn upstream_target(upstream: &str) -> Result<(Uri, Transport), ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidUpstream {
        url: upstream.to_string(),
        reason,
    };

    let mut parsed = url::Url::parse(upstream).map_err(|e| invalid(e.to_string()))?;
    let transport = match parsed.scheme() {
        "http" => Transport::Plain,
        "https" => Transport::Tls,
        other => return Err(invalid(format!("unsupported scheme `{}`", other))),
    };
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    parsed.set_fragment(None);

    let uri = parsed
        .as_str()
        .parse::<Uri>()
        .map_err(|e| invalid(e.to_string()))?;

    Ok((uri, transport))
}

/// Every inbound `Via` line joined into one chain.
fn inbound_via(headers: &HeaderMap) -> Option<String> {
    let hops: Vec<&str> = headers
        .get_all(VIA)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    if hops.is_empty() {
        None
    } else {
        Some(hops.join(", "))
    }
}

/// Copy `headers` verbatim except `Host`, which the client regenerates for
/// the upstream, and `Via`, which is replaced by the chained value.
fn outbound_request(
    method: Method,
    headers: &HeaderMap,
    uri: Uri,
    via: HeaderValue,
    body: Body,
) -> Result<Request<Body>, axum::http::Error> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        if name == HOST || name == VIA {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder.header(VIA, via).body(body)
}
