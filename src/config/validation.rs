//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation of a resolved config (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, body cap > 0)
//! - Check the listen and metrics addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResolvedConfig → Result<(), Vec<ValidationError>>
//! - Runs before the server is constructed

use thiserror::Error;

use crate::config::schema::{parse_listen_addr, ResolvedConfig};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid listen address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("{field} must not be empty")]
    EmptyPath { field: &'static str },

    #[error("invalid metrics address {addr:?}: {reason}")]
    InvalidMetricsAddress { addr: String, reason: String },
}

/// Check a resolved configuration, collecting every problem found.
pub fn validate_config(config: &ResolvedConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = parse_listen_addr(&config.addr) {
        errors.push(ValidationError::InvalidAddress {
            addr: config.addr.clone(),
            reason: e.to_string(),
        });
    }

    if config.read_timeout.is_zero() {
        errors.push(ValidationError::ZeroValue { field: "read_timeout" });
    }
    if config.write_timeout.is_zero() {
        errors.push(ValidationError::ZeroValue { field: "write_timeout" });
    }
    if config.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroValue { field: "max_body_bytes" });
    }

    if config.cert_file_path.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyPath { field: "cert_file_path" });
    }
    if config.key_file_path.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyPath { field: "key_file_path" });
    }

    if let Some(addr) = &config.metrics_address {
        if let Err(e) = parse_listen_addr(addr) {
            errors.push(ValidationError::InvalidMetricsAddress {
                addr: addr.clone(),
                reason: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
