//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → resolve shutdown_signal()
//!
//! Shutdown (shutdown.rs):
//!     Drain listener (deadline) → close certificate watcher → report failures
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: in-flight requests are cut off after it
//! - Both resources are released even when the first one fails

pub mod shutdown;
pub mod signals;

pub use shutdown::{ShutdownError, ShutdownFailure};
pub use signals::shutdown_signal;
