//! Certificate hot reload.
//!
//! # Responsibilities
//! - Own the active certificate pair and hand it to every TLS handshake
//! - Watch the certificate and key files and reload the pair on write
//! - Keep serving the previous pair when a reload fails
//! - Release the watch subscription exactly once on close
//!
//! # Design Decisions
//! - The active pair lives in an `ArcSwap`: handshakes take a lock-free
//!   snapshot, reloads publish a fully built replacement in one store
//! - Reload failures are logged, never fatal; the next write retries
//! - notify's callback only forwards into channels; all reload work happens
//!   on one Tokio task
//! - Reloads are serialized, so generations are unique and a slower reload of
//!   older files never overwrites a newer pair
//! - A replaced file (atomic rename, symlink swap) drops its inotify watch; the
//!   task re-adds the watch on the path and reloads

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::net::tls::{CertificateMaterial, TlsError};
use crate::observability::metrics;

/// How long `close` waits for the watch task to wind down.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the certificate reloader.
#[derive(Debug, Error)]
pub enum ReloaderError {
    #[error("failed to load initial certificate: {0}")]
    InitialLoad(#[source] TlsError),

    #[error("failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("failed to remove watch: {}", join_unwatch(.0))]
    Unwatch(Vec<UnwatchFailure>),

    #[error("certificate watcher already closed")]
    AlreadyClosed,
}

/// A path whose watch could not be removed.
#[derive(Debug)]
pub struct UnwatchFailure {
    pub path: PathBuf,
    pub source: notify::Error,
}

fn join_unwatch(failures: &[UnwatchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.path.display(), f.source))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The slot shared between the reloader, its watch task and the handshake lookup.
#[derive(Debug)]
struct ActiveCertificate {
    current: ArcSwap<CertificateMaterial>,
    /// Held across load and store; readers never take it.
    write: Mutex<()>,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl ActiveCertificate {
    fn reload(&self) -> Result<Arc<CertificateMaterial>, TlsError> {
        let _writer = lock(&self.write);
        let generation = self.current.load().generation + 1;
        let material = Arc::new(CertificateMaterial::load(
            &self.cert_path,
            &self.key_path,
            generation,
        )?);
        self.current.store(Arc::clone(&material));
        Ok(material)
    }

    fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.current.load().certified_key)
    }

    fn is_watched(&self, path: &Path) -> bool {
        path == self.cert_path || path == self.key_path
    }
}

type SharedWatcher = Arc<Mutex<Option<RecommendedWatcher>>>;

/// Watches a certificate/key pair and keeps the freshest valid pair active.
pub struct CertificateReloader {
    active: Arc<ActiveCertificate>,
    watcher: SharedWatcher,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CertificateReloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateReloader")
            .field("cert_path", &self.active.cert_path)
            .field("key_path", &self.active.key_path)
            .field("generation", &self.active.current.load().generation)
            .finish()
    }
}

impl CertificateReloader {
    /// Load the initial pair and start watching both files.
    ///
    /// Fails fast if either file is missing or malformed. Must be called from
    /// within a Tokio runtime; the watch task is spawned onto it.
    pub fn new(cert_path: &Path, key_path: &Path) -> Result<Self, ReloaderError> {
        let initial =
            CertificateMaterial::load(cert_path, key_path, 1).map_err(ReloaderError::InitialLoad)?;
        metrics::record_certificate_generation(initial.generation);

        let active = Arc::new(ActiveCertificate {
            current: ArcSwap::from_pointee(initial),
            write: Mutex::new(()),
            cert_path: cert_path.to_path_buf(),
            key_path: key_path.to_path_buf(),
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Sends only fail once the task is gone, at which point nobody cares.
                match res {
                    Ok(event) => {
                        let _ = event_tx.send(event);
                    }
                    Err(e) => {
                        let _ = error_tx.send(e);
                    }
                }
            },
            Config::default(),
        )
        .map_err(|source| ReloaderError::Watch {
            path: cert_path.to_path_buf(),
            source,
        })?;

        for path in [cert_path, key_path] {
            watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(|source| ReloaderError::Watch {
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        let watcher: SharedWatcher = Arc::new(Mutex::new(Some(watcher)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(watch_loop(
            Arc::clone(&active),
            Arc::clone(&watcher),
            event_rx,
            error_rx,
            stop_rx,
        ));

        tracing::info!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            "Certificate watcher started"
        );

        Ok(Self {
            active,
            watcher,
            stop_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Snapshot of the pair currently presented to clients.
    pub fn current(&self) -> Arc<CertificateMaterial> {
        self.active.current.load_full()
    }

    /// Reload both files now. On failure the active pair is left untouched.
    ///
    /// Concurrent calls, including the watch task's, run one at a time.
    pub fn reload(&self) -> Result<Arc<CertificateMaterial>, TlsError> {
        self.active.reload()
    }

    /// The certificate lookup handed to the TLS layer.
    pub fn resolver(&self) -> Arc<dyn ResolvesServerCert> {
        Arc::new(CertificateLookup {
            active: Arc::clone(&self.active),
        })
    }

    /// Whether the watch subscription has been released.
    pub fn is_closed(&self) -> bool {
        lock(&self.watcher).is_none()
    }

    /// Release the watch subscription and stop the watch task.
    ///
    /// The first call releases; later calls return [`ReloaderError::AlreadyClosed`].
    /// The active certificate keeps being served to handshakes still in flight.
    pub async fn close(&self) -> Result<(), ReloaderError> {
        let Some(mut watcher) = lock(&self.watcher).take() else {
            return Err(ReloaderError::AlreadyClosed);
        };

        let result = unwatch_all(&mut watcher, [&self.active.cert_path, &self.active.key_path]);
        drop(watcher);

        let _ = self.stop_tx.send(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, task).await.is_err() {
                tracing::warn!("Certificate watch task did not stop in time");
            }
        }

        tracing::info!("Certificate watcher closed");
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove every watch, collecting each failure.
fn unwatch_all<'a>(
    watcher: &mut RecommendedWatcher,
    paths: impl IntoIterator<Item = &'a PathBuf>,
) -> Result<(), ReloaderError> {
    let mut failures = Vec::new();
    for path in paths {
        if let Err(source) = watcher.unwatch(path) {
            tracing::warn!(path = %path.display(), error = %source, "Failed to remove watch");
            failures.push(UnwatchFailure {
                path: path.clone(),
                source,
            });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ReloaderError::Unwatch(failures))
    }
}

/// Re-add watches for replaced files. inotify drops a watch when the watched
/// inode goes away, so without this a rename-based rotation ends the watch.
fn rewatch(active: &ActiveCertificate, watcher: &SharedWatcher, paths: &[PathBuf]) {
    let mut guard = lock(watcher);
    let Some(watcher) = guard.as_mut() else {
        return;
    };
    for path in paths.iter().filter(|p| active.is_watched(p)) {
        match watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => tracing::info!(path = %path.display(), "Re-watching replaced certificate file"),
            Err(e) => tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to re-watch replaced certificate file"
            ),
        }
    }
}

/// Handshake-side view of the active certificate.
#[derive(Debug)]
struct CertificateLookup {
    active: Arc<ActiveCertificate>,
}

impl ResolvesServerCert for CertificateLookup {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.active.certified_key())
    }
}

/// Consume watch events until stopped or both channels close.
async fn watch_loop(
    active: Arc<ActiveCertificate>,
    watcher: SharedWatcher,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut errors: mpsc::UnboundedReceiver<notify::Error>,
    mut stop: watch::Receiver<bool>,
) {
    let mut errors_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Certificate watch channel closed, stopping reload loop");
                    break;
                };
                if event.kind.is_remove() {
                    rewatch(&active, &watcher, &event.paths);
                } else if !(event.kind.is_modify() || event.kind.is_create()) {
                    tracing::trace!(kind = ?event.kind, paths = ?event.paths, "Ignoring watch event");
                    continue;
                }

                tracing::info!(paths = ?event.paths, "TLS certificate or key updated, reloading");
                match active.reload() {
                    Ok(material) => {
                        metrics::record_certificate_reload(true);
                        metrics::record_certificate_generation(material.generation);
                        tracing::info!(generation = material.generation, "Certificate reload complete");
                    }
                    Err(e) => {
                        metrics::record_certificate_reload(false);
                        tracing::error!(
                            error = %e,
                            generation = active.current.load().generation,
                            "Certificate reload failed, keeping current certificate"
                        );
                    }
                }
            }
            error = errors.recv(), if errors_open => {
                match error {
                    Some(e) => tracing::error!(error = %e, "Certificate watch error"),
                    None => {
                        tracing::warn!("Certificate watch error channel closed");
                        errors_open = false;
                    }
                }
            }
            _ = stop.changed() => {
                tracing::debug!("Certificate reload loop received stop signal");
                break;
            }
        }
    }
}
