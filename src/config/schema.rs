//! Configuration schema definitions.
//!
//! [`WebhookConfig`] is what operators write: every field is optional.
//! [`WebhookConfig::resolve`] fills the gaps with the named defaults below and
//! yields a [`ResolvedConfig`], which the rest of the service treats as immutable.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listen address. `:port` binds every IPv4 interface.
pub const DEFAULT_ADDR: &str = ":8443";
/// Time allowed for a client to send its request headers.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Time allowed for the handler to produce a response.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// 0 leaves the HTTP stack's own header limit in place.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 0;
/// PEM certificate chain.
pub const DEFAULT_CERT_FILE_PATH: &str = "./certs/tls.crt";
/// PEM private key.
pub const DEFAULT_KEY_FILE_PATH: &str = "./certs/tls.key";
/// Largest admission review body accepted on `/mutate`.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
/// Drain deadline used by the binary on SIGINT/SIGTERM.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Log level when neither the config nor RUST_LOG sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Service configuration as written by the operator.
///
/// Any field left as `None` falls back to its `DEFAULT_*` constant.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// TCP address to listen on, `host:port` or `:port`.
    pub addr: Option<String>,

    /// Header read timeout in seconds.
    pub read_timeout_secs: Option<u64>,

    /// Handler timeout in seconds.
    pub write_timeout_secs: Option<u64>,

    /// Cap on request header bytes (0 = HTTP stack default).
    pub max_header_bytes: Option<usize>,

    /// Path to the certificate file (PEM).
    pub cert_file_path: Option<PathBuf>,

    /// Path to the private key file (PEM).
    pub key_file_path: Option<PathBuf>,

    /// Cap on the `/mutate` request body.
    pub max_body_bytes: Option<usize>,

    /// Graceful shutdown deadline in seconds.
    pub shutdown_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: Option<String>,

    /// Prometheus exporter bind address. Unset disables the exporter.
    pub metrics_address: Option<String>,

    /// Labels added to every admitted object by the stock label injector.
    pub labels: BTreeMap<String, String>,
}

impl WebhookConfig {
    /// Fill every unset field with its default.
    ///
    /// Pure: explicitly set values pass through untouched.
    pub fn resolve(self) -> ResolvedConfig {
        ResolvedConfig {
            addr: self.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            read_timeout: self
                .read_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_READ_TIMEOUT),
            write_timeout: self
                .write_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WRITE_TIMEOUT),
            max_header_bytes: self.max_header_bytes.unwrap_or(DEFAULT_MAX_HEADER_BYTES),
            cert_file_path: self
                .cert_file_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CERT_FILE_PATH)),
            key_file_path: self
                .key_file_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_FILE_PATH)),
            max_body_bytes: self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            shutdown_timeout: self
                .shutdown_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            log_level: self
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            metrics_address: self.metrics_address,
            labels: self.labels,
        }
    }
}

/// Configuration with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub addr: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
    pub cert_file_path: PathBuf,
    pub key_file_path: PathBuf,
    pub max_body_bytes: usize,
    pub shutdown_timeout: Duration,
    pub log_level: String,
    pub metrics_address: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        WebhookConfig::default().resolve()
    }
}

impl ResolvedConfig {
    /// Parse the listen address into a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        parse_listen_addr(&self.addr)
    }
}

/// Parse `host:port`, treating a bare `:port` as `0.0.0.0:port`.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr).parse()
    } else {
        addr.parse()
    }
}
