//! # Clinic Core
//!
//! Shared foundations for the clinic platform.
//!
//! This crate provides:
//! - The error taxonomy: stable codes, retry classes and transport statuses
//! - Redaction of credentials before anything reaches a log sink
//! - Configuration loading and validation (JSON5 format)
//! - Pagination types shared by every store

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod redact;
pub mod types;

pub use config::{AuthConfig, AuthConfigBuilder, Config, ConfigError};
pub use error::{AppError, ErrorContext, ErrorKind, ErrorResponse};
pub use redact::{REDACTED, RequestLogContext, redact_headers, redact_json, scrub_secrets};
pub use types::{PageRequest, Paginated};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{AppError, ErrorKind};
    pub use crate::redact::RequestLogContext;
    pub use crate::types::{PageRequest, Paginated};
}
