//! # Clinic Gateway
//!
//! Axum glue for clinic identity. Handlers take [`CurrentUser`],
//! [`RequireAdmin`] or [`RequirePermission`] to gate access and return
//! [`ApiError`] to render failures. Routes belong to the host application.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod error;

pub use auth::{
    AuthState, CurrentUser, OptionalUser, PermissionName, RequireAdmin, RequirePermission,
    request_log_context,
};
pub use error::ApiError;
