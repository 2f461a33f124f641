//! Certificate loading and `rustls` configuration for the mesh's mutual-TLS
//! handshake (§4.5: "TLS with mutual certificate authentication").
//!
//! Every endpoint trusts the same CA and presents its own leaf
//! certificate; identity is derived from the peer's certificate CN, not
//! from any separate credential.

use std::path::Path;
use std::sync::{Arc, Once};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{MeshError, Result};

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// Installs the process-wide default crypto provider exactly once. Safe to
/// call from every `Mesh::new` — `rustls` configs panic on first use if no
/// provider was installed.
fn ensure_crypto_provider() {
    INSTALL_CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = std::fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| MeshError::Tls(format!("failed to parse {}: {err}", path.display())))?;
    if certs.is_empty() {
        return Err(MeshError::Tls(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|err| MeshError::Tls(format!("failed to parse {}: {err}", path.display())))?
        .ok_or_else(|| MeshError::Tls(format!("no private key found in {}", path.display())))
}

fn load_root_store(ca_cert_path: &Path) -> Result<Arc<RootCertStore>> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_cert_path)? {
        roots
            .add(cert)
            .map_err(|err| MeshError::Tls(format!("invalid CA certificate: {err}")))?;
    }
    Ok(Arc::new(roots))
}

/// Requires every connecting peer to present a certificate signed by the
/// shared CA; `connection.rs` rejects the peer post-handshake if its CN
/// doesn't map to a configured endpoint.
pub fn server_config(
    cert_path: &Path,
    key_path: &Path,
    ca_cert_path: &Path,
) -> Result<Arc<ServerConfig>> {
    ensure_crypto_provider();
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let roots = load_root_store(ca_cert_path)?;

    let verifier = WebPkiClientVerifier::builder(roots)
        .build()
        .map_err(|err| MeshError::Tls(format!("failed to build client verifier: {err}")))?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|err| MeshError::Tls(err.to_string()))?;
    Ok(Arc::new(config))
}

/// Presents our own leaf certificate and trusts the same CA for the peer's.
pub fn client_config(
    cert_path: &Path,
    key_path: &Path,
    ca_cert_path: &Path,
) -> Result<Arc<ClientConfig>> {
    ensure_crypto_provider();
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let roots = load_root_store(ca_cert_path)?;

    let config = ClientConfig::builder()
        .with_root_certificates(Arc::clone(&roots))
        .with_client_auth_cert(certs, key)
        .map_err(|err| MeshError::Tls(err.to_string()))?;
    Ok(Arc::new(config))
}
