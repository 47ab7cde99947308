//! TLS material subsystem.
//!
//! # Data Flow
//! ```text
//! cert/key PEM files on disk
//!     → tls.rs (parse, match check → CertificateMaterial)
//!     → reloader.rs (atomic slot, file watcher, ResolvesServerCert)
//!     → every TLS handshake reads the current slot
//! ```
//!
//! # Design Decisions
//! - The slot is swapped whole; a handshake never sees a half-updated pair
//! - A failed reload keeps the previous pair in service

pub mod reloader;
pub mod tls;

pub use reloader::{CertificateReloader, ReloaderError};
pub use tls::{CertificateMaterial, TlsError};
