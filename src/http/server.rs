//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the outbound forwarder from configuration
//! - Put the rewrite middleware in front of the next stage
//! - Wire up middleware (tracing, request timeout)
//! - Serve over plain TCP or TLS with graceful shutdown

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::{StatusCode, Uri},
    middleware,
    response::IntoResponse,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::Layer;
use tower_http::{services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{GatewayConfig, StaticFilesConfig};
use crate::http::middleware::{rewrite_middleware, RewriteState};
use crate::proxy::{Forwarder, ViaIdentity};
use crate::rewrite::RuleSet;

/// How long in-flight requests may drain after a TLS shutdown signal.
const TLS_DRAIN_SECS: u64 = 10;

/// HTTP server hosting the rule engine.
pub struct HttpServer {
    config: GatewayConfig,
    rules: RuleSet,
    forwarder: Forwarder,
    next_stage: Router,
}

impl HttpServer {
    /// Create a server for `rules`.
    ///
    /// The next stage defaults to the configured static files, or a 404
    /// fallback when there is no document root.
    pub fn new(config: GatewayConfig, rules: RuleSet) -> Result<Self, rustls::Error> {
        let via = match &config.proxy.via_identity {
            Some(identity) => ViaIdentity::new(identity.clone()),
            None => ViaIdentity::from_hostname(),
        };
        let forwarder = Forwarder::new(via, Duration::from_secs(config.timeouts.connect_secs))?;
        let next_stage = default_next_stage(&config.static_files);

        tracing::info!(
            rules = rules.len(),
            via = forwarder.via().as_str(),
            "Rewrite gateway initialised"
        );

        Ok(Self {
            config,
            rules,
            forwarder,
            next_stage,
        })
    }

    /// Replace the stage that receives requests no rule terminated.
    pub fn with_next_stage(mut self, next_stage: Router) -> Self {
        self.next_stage = next_stage;
        self
    }

    /// Build the full service.
    ///
    /// The rewrite middleware wraps the next stage as a whole so a rewritten
    /// URI is what the next stage routes on.
    #[allow(deprecated)]
    pub fn build_router(&self, encrypted: bool) -> Router {
        let state = RewriteState {
            rules: self.rules.clone(),
            forwarder: self.forwarder.clone(),
            encrypted,
        };

        let rewritten = middleware::from_fn_with_state(state, rewrite_middleware)
            .layer(self.next_stage.clone());

        Router::new()
            .fallback_service(rewritten)
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve plain HTTP on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.build_router(false);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let signal = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received");
            signal.graceful_shutdown(Some(Duration::from_secs(TLS_DRAIN_SECS)));
        });

        let app = self.build_router(true);
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

fn default_next_stage(config: &StaticFilesConfig) -> Router {
    match &config.root {
        Some(root) => {
            tracing::info!(root = %root.display(), "Serving static files");
            Router::new().fallback_service(ServeDir::new(root))
        }
        None => Router::new().fallback(not_found),
    }
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    tracing::debug!(path = %uri.path(), "No resource for request");
    (StatusCode::NOT_FOUND, "Not Found")
}
