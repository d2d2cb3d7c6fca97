//! TLS material for the HTTPS listener.
//!
//! A self-signed certificate is generated once and persisted under the
//! keys directory, so the honeypot presents the same certificate across
//! restarts. The SHA-256 fingerprint is surfaced in diagnostics.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::info;

const CERT_FILE: &str = "https_cert.pem";
const KEY_FILE: &str = "https_key.pem";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("tls io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate generation failed: {0}")]
    Generate(String),

    #[error("certificate material invalid: {0}")]
    Material(String),
}

/// Acceptor plus the fingerprint shown by `/api-diagnostics`.
pub struct TlsMaterial {
    pub acceptor: TlsAcceptor,
    pub fingerprint: String,
}

/// Load the persisted certificate, generating and persisting a fresh
/// self-signed one on first run.
pub fn load_or_generate(keys_dir: &Path) -> Result<TlsMaterial, TlsError> {
    fs::create_dir_all(keys_dir)?;
    let cert_path = keys_dir.join(CERT_FILE);
    let key_path = keys_dir.join(KEY_FILE);

    if !cert_path.exists() || !key_path.exists() {
        let pair = generate_self_signed()?;
        fs::write(&cert_path, &pair.0)?;
        fs::write(&key_path, &pair.1)?;
        info!(path = ?cert_path, "generated self-signed HTTPS certificate");
    }

    let certs = read_certs(&cert_path)?;
    let key = read_key(&key_path)?;
    let fingerprint = fingerprint_of(certs.first().ok_or_else(|| {
        TlsError::Material("certificate file holds no certificates".to_string())
    })?);

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Material(e.to_string()))?;

    Ok(TlsMaterial {
        acceptor: TlsAcceptor::from(Arc::new(config)),
        fingerprint,
    })
}

/// Generate a self-signed certificate, returning (cert PEM, key PEM).
fn generate_self_signed() -> Result<(String, String), TlsError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "Acme Web Services");
    dn.push(DnType::CommonName, "localhost");
    params.distinguished_name = dn;
    params.subject_alt_names.push(
        rcgen::SanType::DnsName(
            "localhost"
                .to_string()
                .try_into()
                .map_err(|_| TlsError::Generate("invalid SAN".to_string()))?,
        ),
    );

    let key_pair = KeyPair::generate().map_err(|e| TlsError::Generate(e.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TlsError::Generate(e.to_string()))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Material(e.to_string()))
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Material(e.to_string()))?
        .ok_or_else(|| TlsError::Material("key file holds no private key".to_string()))
}

/// Colon-separated SHA-256 fingerprint of the DER certificate.
fn fingerprint_of(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    hex::encode(digest)
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or("??"))
        .collect::<Vec<_>>()
        .join(":")
}
