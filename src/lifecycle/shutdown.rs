//! Shutdown failure reporting.
//!
//! Stopping the webhook releases two things: the TLS listener and the
//! certificate file watcher. Both are always attempted; whatever failed is
//! reported together.

use std::fmt;

use crate::http::server::ServerError;
use crate::net::reloader::ReloaderError;

/// One resource that failed to release.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownFailure {
    #[error("listener: {0}")]
    Listener(#[source] ServerError),

    #[error("certificate watcher: {0}")]
    Watcher(#[source] ReloaderError),
}

/// Every failure from a single shutdown attempt.
#[derive(Debug)]
pub struct ShutdownError {
    pub failures: Vec<ShutdownFailure>,
}

impl ShutdownError {
    pub fn listener_failed(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, ShutdownFailure::Listener(_)))
    }

    pub fn watcher_failed(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f, ShutdownFailure::Watcher(_)))
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("shutdown failed: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {}
