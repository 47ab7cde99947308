//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;
use rustls::{InconsistentKeys, ServerConfig};
use thiserror::Error;

/// ALPN identifiers advertised by the listener, most preferred first.
pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Errors raised while loading a certificate pair or building the TLS config.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificate found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("unsupported private key in {}: {source}", .path.display())]
    UnsupportedKey {
        path: PathBuf,
        source: rustls::Error,
    },

    #[error("certificate {} does not match private key {}", .cert.display(), .key.display())]
    KeyMismatch { cert: PathBuf, key: PathBuf },

    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),
}

/// A parsed certificate chain and signing key, plus where they came from.
///
/// Never mutated after construction; a reload builds a new value.
#[derive(Debug)]
pub struct CertificateMaterial {
    /// Chain and key in the form the handshake consumes.
    pub certified_key: Arc<CertifiedKey>,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Starts at 1 for the initial load, +1 for every successful reload.
    pub generation: u64,
    pub loaded_at: SystemTime,
}

impl CertificateMaterial {
    /// Read and parse both PEM files as one consistent pair.
    pub fn load(cert_path: &Path, key_path: &Path, generation: u64) -> Result<Self, TlsError> {
        let chain = read_certificates(cert_path)?;
        let key = read_private_key(key_path)?;

        let signing_key = crypto_provider()
            .key_provider
            .load_private_key(key)
            .map_err(|source| TlsError::UnsupportedKey {
                path: key_path.to_path_buf(),
                source,
            })?;

        let certified_key = CertifiedKey::new(chain, signing_key);

        // Unknown means the provider cannot compare; accept the pair as-is.
        match certified_key.keys_match() {
            Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {}
            Err(_) => {
                return Err(TlsError::KeyMismatch {
                    cert: cert_path.to_path_buf(),
                    key: key_path.to_path_buf(),
                })
            }
        }

        Ok(Self {
            certified_key: Arc::new(certified_key),
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
            generation,
            loaded_at: SystemTime::now(),
        })
    }

    /// The end-entity certificate presented to clients.
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.certified_key.cert.first()
    }
}

/// Build the server-side TLS config around a certificate lookup.
///
/// The resolver is consulted on every handshake, so swapping what it returns
/// rotates the certificate without touching the listener.
pub fn server_config(resolver: Arc<dyn ResolvesServerCert>) -> Result<ServerConfig, TlsError> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if chain.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(chain)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
