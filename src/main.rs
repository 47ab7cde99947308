//! Mutating admission webhook
//!
//! ```text
//!   kube-apiserver
//!        │  POST /mutate (AdmissionReview, TLS)
//!        ▼
//!  ┌───────────────────────────────────────────────┐
//!  │ http::server   h2 / http1.1, request ID, trace │
//!  │      │                                        │
//!  │      ▼                                        │
//!  │ http::handlers  decode → Mutator → normalize  │
//!  │                                               │
//!  │ net::reloader   cert files ──watch──▶ slot ───┼──▶ TLS handshakes
//!  └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use mutating_webhook::admission::{AllowAll, LabelInjector, Mutator};
use mutating_webhook::config::{self, ConfigError, WebhookConfig};
use mutating_webhook::lifecycle::shutdown_signal;
use mutating_webhook::observability::{logging, metrics};
use mutating_webhook::WebhookServer;

#[derive(Parser)]
#[command(name = "mutating-webhook")]
#[command(about = "Kubernetes mutating admission webhook server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. ":8443" or "127.0.0.1:8443"
    #[arg(long)]
    addr: Option<String>,

    /// PEM certificate chain
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long)]
    key: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut file_config = match &cli.config {
        Some(path) => match config::load_config(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => WebhookConfig::default(),
    };
    if cli.addr.is_some() {
        file_config.addr = cli.addr;
    }
    if cli.cert.is_some() {
        file_config.cert_file_path = cli.cert;
    }
    if cli.key.is_some() {
        file_config.key_file_path = cli.key;
    }
    if cli.log_level.is_some() {
        file_config.log_level = cli.log_level;
    }
    let resolved = file_config.resolve();

    if let Err(e) = logging::init_logging(&resolved.log_level) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!("mutating-webhook v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config::validate_config(&resolved).map_err(ConfigError::Validation) {
        tracing::error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    if let Some(addr) = &resolved.metrics_address {
        match config::schema::parse_listen_addr(addr) {
            Ok(parsed) => {
                if let Err(e) = metrics::init_metrics(parsed) {
                    tracing::error!(metrics_address = %addr, error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(metrics_address = %addr, error = %e, "Invalid metrics address"),
        }
    }

    let mutator: Arc<dyn Mutator> = if resolved.labels.is_empty() {
        Arc::new(AllowAll)
    } else {
        tracing::info!(labels = ?resolved.labels, "Injecting labels into admitted objects");
        Arc::new(LabelInjector::new(resolved.labels.clone()))
    };

    tracing::info!(
        addr = %resolved.addr,
        cert = %resolved.cert_file_path.display(),
        key = %resolved.key_file_path.display(),
        "Configuration loaded"
    );

    let shutdown_timeout = resolved.shutdown_timeout;
    let server = match WebhookServer::new(mutator, resolved) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "Failed to create webhook server");
            return ExitCode::FAILURE;
        }
    };

    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => {
            match result {
                Ok(Ok(())) => tracing::warn!("Webhook server exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Webhook server failed to start"),
                Err(e) => tracing::error!(error = %e, "Webhook server task panicked"),
            }
            if let Err(e) = server.reloader().close().await {
                tracing::warn!(error = %e, "Failed to close certificate watcher");
            }
            return ExitCode::FAILURE;
        }
        _ = shutdown_signal() => {}
    }

    match server.shutdown(shutdown_timeout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Shutdown incomplete");
            ExitCode::FAILURE
        }
    }
}
