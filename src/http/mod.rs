//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TLS connection (h2 or http/1.1 via ALPN)
//!     → server.rs (Axum setup, request ID, trace, write timeout)
//!     → handlers.rs (media type check, decode, mutate, normalize, encode)
//!     → Send to client
//! ```

pub mod handlers;
pub mod server;

pub use handlers::{AdmissionError, AppState};
pub use server::{build_router, ServerError, WebhookServer};
