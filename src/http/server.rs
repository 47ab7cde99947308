//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Create the Axum router with the admission handlers
//! - Wire the certificate reloader's lookup into the rustls config
//! - Negotiate HTTP/2 or HTTP/1.1 via ALPN
//! - Apply read/write timeouts and header limits
//! - Serve until told to stop, then drain and release the cert watcher

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use hyper_util::rt::TokioTimer;
use thiserror::Error;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admission::Mutator;
use crate::config::ResolvedConfig;
use crate::http::handlers::{self, AppState};
use crate::lifecycle::shutdown::{ShutdownError, ShutdownFailure};
use crate::net::reloader::{CertificateReloader, ReloaderError};
use crate::net::tls::{self, TlsError};

/// Extra time allowed past the drain deadline for the serve loop to return.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// hyper refuses HTTP/1 read buffers smaller than this.
const MIN_HTTP1_BUF_SIZE: usize = 8192;

/// Errors from constructing or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address {addr:?}: {source}")]
    Address {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error(transparent)]
    Reloader(#[from] ReloaderError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("server already started")]
    AlreadyStarted,

    #[error("server is not running")]
    NotRunning,

    #[error("server did not stop within {0:?}")]
    StopTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Ready,
    Serving,
    Stopping,
    Stopped,
}

/// A TLS admission webhook server.
///
/// `start` serves until `shutdown` is called from elsewhere; wrap the server
/// in an `Arc` and run `start` on its own task.
pub struct WebhookServer {
    config: ResolvedConfig,
    reloader: Arc<CertificateReloader>,
    tls: RustlsConfig,
    router: Router,
    handle: Handle,
    state: Mutex<ServerState>,
    stopped_tx: watch::Sender<bool>,
}

impl fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookServer")
            .field("addr", &self.config.addr)
            .field("state", &*lock(&self.state))
            .field("reloader", &self.reloader)
            .finish()
    }
}

impl WebhookServer {
    /// Load the certificate, start watching it, and build the router.
    ///
    /// Fails if the certificate pair cannot be loaded. Must be called within a
    /// Tokio runtime.
    pub fn new(mutator: Arc<dyn Mutator>, config: ResolvedConfig) -> Result<Self, ServerError> {
        let reloader = Arc::new(CertificateReloader::new(
            &config.cert_file_path,
            &config.key_file_path,
        )?);
        let server_config = tls::server_config(reloader.resolver())?;
        let tls = RustlsConfig::from_config(Arc::new(server_config));

        let state = AppState {
            mutator,
            max_body_bytes: config.max_body_bytes,
        };
        let router = build_router(state, config.write_timeout);
        let (stopped_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            reloader,
            tls,
            router,
            handle: Handle::new(),
            state: Mutex::new(ServerState::Ready),
            stopped_tx,
        })
    }

    /// The certificate reloader backing every handshake.
    pub fn reloader(&self) -> &Arc<CertificateReloader> {
        &self.reloader
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Wait until the listener is bound and return its address.
    ///
    /// Returns `None` if binding failed or the server has already stopped.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let mut stopped = self.stopped_tx.subscribe();
        let addr = tokio::select! {
            addr = self.handle.listening() => addr,
            _ = stopped.wait_for(|stopped| *stopped) => None,
        };
        addr
    }

    /// Bind and serve until [`shutdown`](Self::shutdown) completes.
    ///
    /// A bind failure is returned immediately. A server can be started once.
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = lock(&self.state);
            if *state != ServerState::Ready {
                return Err(ServerError::AlreadyStarted);
            }
            *state = ServerState::Serving;
        }

        let result = self.serve().await;

        *lock(&self.state) = ServerState::Stopped;
        self.stopped_tx.send_replace(true);

        match &result {
            Ok(()) => tracing::info!("Webhook server stopped"),
            Err(e) => tracing::error!(error = %e, "Webhook server failed"),
        }
        result
    }

    async fn serve(&self) -> Result<(), ServerError> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|source| ServerError::Address {
                addr: self.config.addr.clone(),
                source,
            })?;

        let mut server = axum_server::bind_rustls(addr, self.tls.clone()).handle(self.handle.clone());

        let builder = server.http_builder();
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.read_timeout);
        if self.config.max_header_bytes > 0 {
            builder
                .http1()
                .max_buf_size(self.config.max_header_bytes.max(MIN_HTTP1_BUF_SIZE));
            builder
                .http2()
                .max_header_list_size(u32::try_from(self.config.max_header_bytes).unwrap_or(u32::MAX));
        }

        tracing::info!(
            address = %addr,
            read_timeout = ?self.config.read_timeout,
            write_timeout = ?self.config.write_timeout,
            "Webhook server listening with TLS"
        );

        server
            .serve(self.router.clone().into_make_service())
            .await
            .map_err(ServerError::Serve)
    }

    /// Drain in-flight requests for up to `deadline`, then stop the listener
    /// and release the certificate watcher.
    ///
    /// Both releases are attempted even if one fails; every failure is
    /// returned together.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownError> {
        tracing::info!(deadline = ?deadline, "Shutting down webhook server");
        let mut failures = Vec::new();

        if let Err(e) = self.stop_listener(deadline).await {
            tracing::warn!(error = %e, "Failed to stop listener");
            failures.push(ShutdownFailure::Listener(e));
        }
        if let Err(e) = self.reloader.close().await {
            tracing::warn!(error = %e, "Failed to close certificate watcher");
            failures.push(ShutdownFailure::Watcher(e));
        }

        if failures.is_empty() {
            tracing::info!("Shutdown complete");
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }

    async fn stop_listener(&self, deadline: Duration) -> Result<(), ServerError> {
        {
            let mut state = lock(&self.state);
            match *state {
                ServerState::Serving => *state = ServerState::Stopping,
                ServerState::Ready => {
                    *state = ServerState::Stopped;
                    return Err(ServerError::NotRunning);
                }
                ServerState::Stopping | ServerState::Stopped => return Err(ServerError::NotRunning),
            }
        }

        self.handle.graceful_shutdown(Some(deadline));

        let mut stopped = self.stopped_tx.subscribe();
        let limit = deadline + STOP_GRACE;
        let waited = tokio::time::timeout(limit, stopped.wait_for(|stopped| *stopped))
            .await
            .is_ok();
        if waited {
            Ok(())
        } else {
            Err(ServerError::StopTimeout(limit))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, write_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/_healthz", get(handlers::healthz))
        .route("/_ready", get(handlers::ready))
        .route("/mutate", post(handlers::mutate))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(write_timeout)),
        )
}
