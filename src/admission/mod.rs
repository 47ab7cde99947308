//! Admission review protocol.
//!
//! # Data Flow
//! ```text
//! POST /mutate body
//!     → types.rs (AdmissionReview { request })
//!     → mutator.rs (Mutator::mutate → AdmissionResponse)
//!     → types.rs (AdmissionReview { response }, patch base64-encoded)
//! ```

pub mod mutator;
pub mod types;

pub use mutator::{AllowAll, LabelInjector, MutateError, Mutator};
pub use types::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, GroupVersionKind, Operation,
    PatchOperation, PatchType,
};
