//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, frame limit > 0, parsable address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use crate::config::schema::TransportConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = config.listener.endpoint() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address: {}", config.listener.bind_address, e),
        ));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    if config.listener.receive_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "listener.receive_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.outbound.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "outbound.connect_timeout_secs",
            "must be greater than zero",
        ));
    }

    if let Some(tls) = &config.outbound.tls {
        if tls.ca_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("outbound.tls.ca_path", "must not be empty"));
        }
    }

    if config.protocol.max_frame_bytes == 0 {
        errors.push(ValidationError::new(
            "protocol.max_frame_bytes",
            "must be greater than zero",
        ));
    } else if config.protocol.max_frame_bytes > u32::MAX as usize {
        errors.push(ValidationError::new(
            "protocol.max_frame_bytes",
            "must fit in the 32-bit length header",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
