//! Identity errors and their classification.

use clinic_core::{AppError, ConfigError, ErrorContext};
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use thiserror::Error;
use validator::ValidationErrors;

/// Identity, authorization and token errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Entity not found.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource type.
        resource: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A unique field is already taken.
    #[error("{resource} with {field} '{value}' already exists")]
    Duplicate {
        /// Resource type.
        resource: &'static str,
        /// Unique field.
        field: &'static str,
        /// Conflicting value.
        value: String,
    },

    /// A write named ids that do not exist.
    #[error("Unknown {resource} id(s): {}", .missing.join(", "))]
    UnknownReference {
        /// Referenced resource type.
        resource: &'static str,
        /// Request field holding the references.
        field: &'static str,
        /// Ids that did not resolve.
        missing: Vec<String>,
    },

    /// The user holds the administrator role.
    #[error("cannot delete system administrator")]
    SystemAdminProtected {
        /// The protected user.
        user_id: String,
    },

    /// Credentials did not validate.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token is malformed, expired, or its subject no longer exists.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// Authenticated but not allowed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Input failed validation. Display names fields and rules only.
    #[error("Validation failed: {}", describe_validation(.0))]
    Validation(#[from] ValidationErrors),

    /// Token signing failed.
    #[error("Token error: {0}")]
    Token(String),

    /// Password hashing failed.
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// `field: code` pairs, sorted. Submitted values are never included.
fn describe_validation(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .into_iter()
        .map(|(field, list)| {
            let codes: Vec<String> = list.iter().map(|e| e.code.to_string()).collect();
            format!("{field}: {}", codes.join(", "))
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

impl IdentityError {
    /// Not-found error for a resource.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }
}

impl From<sled::Error> for IdentityError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("Serialization error: {err}"))
    }
}

impl From<TransactionError<Self>> for IdentityError {
    fn from(err: TransactionError<Self>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Self::from(e),
        }
    }
}

impl From<IdentityError> for ConflictableTransactionError<IdentityError> {
    fn from(err: IdentityError) -> Self {
        Self::Abort(err)
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        let message = err.to_string();
        match err {
            IdentityError::NotFound { resource, id } => Self::not_found(resource, id),
            IdentityError::Duplicate {
                resource,
                field,
                value,
            } => Self::conflict(resource, field, value),
            IdentityError::UnknownReference { field, missing, .. } => {
                let missing = missing.into_iter().map(Value::String).collect();
                Self::invalid_field(field, Some(Value::Array(missing)), message)
                    .with_code("INVALID_REFERENCE")
            }
            IdentityError::SystemAdminProtected { user_id } => {
                Self::business_rule("system_admin_protected", message)
                    .with_code("SYSTEM_ADMIN_PROTECTED")
                    .with_context(
                        ErrorContext::rule("system_admin_protected").with_detail("userId", user_id),
                    )
            }
            IdentityError::InvalidCredentials => Self::authentication(message),
            IdentityError::InvalidToken => {
                Self::authentication(message).with_code("INVALID_TOKEN")
            }
            IdentityError::PermissionDenied(_) => Self::authorization(message),
            IdentityError::Validation(errors) => {
                let mut fields: Vec<String> = errors
                    .field_errors()
                    .keys()
                    .map(ToString::to_string)
                    .collect();
                fields.sort();
                let app = Self::validation(message);
                match fields.into_iter().next() {
                    Some(field) => app.with_context(ErrorContext::field(field, None)),
                    None => app,
                }
            }
            IdentityError::Token(_) | IdentityError::Hashing(_) | IdentityError::Storage(_) => {
                Self::unknown(message)
            }
            IdentityError::Config(e) => Self::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateUser, UpdateUser};
    use clinic_core::ErrorKind;
    use serde_json::json;
    use validator::Validate;

    #[test]
    fn test_reference_error_mapping() {
        let err: AppError = IdentityError::UnknownReference {
            resource: "role",
            field: "roles",
            missing: vec!["r-404".to_string()],
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "INVALID_REFERENCE");
        assert_eq!(err.to_string(), "Unknown role id(s): r-404");
        assert_eq!(
            err.to_response().details,
            Some(json!({"field": "roles", "value": ["r-404"]}))
        );
    }

    #[test]
    fn test_admin_protection_mapping() {
        let err: AppError = IdentityError::SystemAdminProtected {
            user_id: "u1".to_string(),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::BusinessRuleViolation);
        assert_eq!(err.http_status(), 409);
        assert!(!err.is_retryable());
        assert_eq!(err.message(), "cannot delete system administrator");
    }

    #[test]
    fn test_auth_failures_share_a_message() {
        let err: AppError = IdentityError::InvalidCredentials.into();
        assert_eq!(err.http_status(), 401);
        assert_eq!(err.message(), "Invalid credentials");

        let err: AppError = IdentityError::InvalidToken.into();
        assert_eq!(err.http_status(), 401);
        assert_eq!(err.code(), "INVALID_TOKEN");
    }

    #[test]
    fn test_backend_failures_are_internal() {
        let err: AppError = IdentityError::Storage("io".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.to_response().message, "Internal server error");
    }

    #[test]
    fn test_duplicate_mapping() {
        let err: AppError = IdentityError::Duplicate {
            resource: "user",
            field: "email",
            value: "a@b.c".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn test_validation_message_omits_values() {
        let errors = CreateUser::new("jdoe", "not-an-email", "hunter2")
            .validate()
            .unwrap_err();
        let err = IdentityError::from(errors);
        assert!(!err.to_string().contains("hunter2"));
        assert!(!err.to_string().contains("not-an-email"));

        let app: AppError = err.into();
        let response = app.to_response();
        assert_eq!(app.kind(), ErrorKind::Validation);
        assert_eq!(response.message, "Validation failed: email: email; password: length");
        assert!(!serde_json::to_string(&response).unwrap().contains("hunter2"));

        let errors = UpdateUser {
            password: Some("hunter2".to_string()),
            ..UpdateUser::default()
        }
        .validate()
        .unwrap_err();
        let app: AppError = IdentityError::from(errors).into();
        assert!(!app.to_response().message.contains("hunter2"));
        assert_eq!(app.to_response().details, Some(json!({"field": "password"})));
    }
}
