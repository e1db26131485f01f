//! TLS configuration and certificate loading for the listener.

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;

/// Load the listener's certificate chain and private key.
///
/// Installs the process-wide rustls crypto provider first so the server
/// config and the forwarder's client config agree on one backend.
pub async fn load_tls_config(tls: &TlsConfig) -> Result<RustlsConfig, std::io::Error> {
    for (label, path) in [("Certificate", &tls.cert_path), ("Private key", &tls.key_path)] {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} file not found: {}", label, path.display()),
            ));
        }
    }

    // Already installed is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
    tracing::info!(cert = %tls.cert_path.display(), "TLS certificate loaded");
    Ok(config)
}
