//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional) + CLI overrides
//!     → loader.rs (parse & deserialize into WebhookConfig)
//!     → schema.rs (resolve: unset fields take named defaults)
//!     → validation.rs (semantic checks)
//!     → ResolvedConfig (immutable for the life of the process)
//! ```
//!
//! # Design Decisions
//! - Every field is optional; defaults live in named constants, not globals
//! - Resolution is a pure function
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ResolvedConfig, WebhookConfig};
pub use validation::{validate_config, ValidationError};
