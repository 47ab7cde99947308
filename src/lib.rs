//! Kubernetes mutating admission webhook library.
//!
//! Serves `AdmissionReview` requests over TLS, hands each request to a
//! user-supplied [`Mutator`], and hot-reloads the serving certificate when
//! its files change on disk.

pub mod admission;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Mutator};
pub use config::{ResolvedConfig, WebhookConfig};
pub use http::WebhookServer;
pub use lifecycle::ShutdownError;
pub use net::CertificateReloader;
