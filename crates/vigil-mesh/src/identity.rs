//! Peer identity: the subject CN of the certificate presented in the TLS
//! handshake (§3: "An endpoint's identity is the CN of its X.509
//! certificate").

use std::path::Path;

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::*;

use crate::error::{MeshError, Result};

/// Reads our own leaf certificate's subject CN — our identity in the
/// mesh, read the same way a peer's identity is read from the
/// certificate it presents at handshake (§3).
pub fn own_common_name(cert_path: &Path) -> Result<String> {
    let certs = crate::tls::load_certs(cert_path)?;
    let cert = certs.first().ok_or(MeshError::MissingCommonName)?;
    peer_common_name(cert)
}

pub fn peer_common_name(cert: &CertificateDer<'_>) -> Result<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|err| MeshError::Tls(format!("invalid peer certificate: {err}")))?;

    parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .ok_or(MeshError::MissingCommonName)
}
