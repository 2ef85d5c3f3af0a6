//! Error taxonomy shared by every layer.
//!
//! Every failure is classified into an [`ErrorKind`], which fixes its stable
//! code, whether the caller may retry, and the transport status a host layer
//! renders it with. Domain crates keep their own `thiserror` enums and convert
//! into [`AppError`] at the boundary.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::redact::{self, RequestLogContext};

/// Message shown to callers in place of internal failure details.
const INTERNAL_MESSAGE: &str = "Internal server error";

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or semantically invalid input.
    Validation,
    /// The caller could not be authenticated.
    Authentication,
    /// The caller is authenticated but not allowed.
    Authorization,
    /// A referenced resource does not exist.
    NotFound,
    /// A uniqueness or state conflict.
    Conflict,
    /// A business rule rejected the operation.
    BusinessRuleViolation,
    /// The caller exceeded a rate limit.
    RateLimit,
    /// A downstream service failed.
    ExternalService,
    /// An operation did not finish in time.
    OperationTimeout,
    /// Anything not classified above.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Validation,
        Self::Authentication,
        Self::Authorization,
        Self::NotFound,
        Self::Conflict,
        Self::BusinessRuleViolation,
        Self::RateLimit,
        Self::ExternalService,
        Self::OperationTimeout,
        Self::Unknown,
    ];

    /// Transport status for this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::NotFound => 404,
            Self::Conflict | Self::BusinessRuleViolation => 409,
            Self::RateLimit => 429,
            Self::ExternalService => 502,
            Self::OperationTimeout => 504,
            Self::Unknown => 500,
        }
    }

    /// Stable default code for this kind.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            Self::RateLimit => "RATE_LIMIT_EXCEEDED",
            Self::ExternalService => "EXTERNAL_SERVICE_ERROR",
            Self::OperationTimeout => "OPERATION_TIMEOUT",
            Self::Unknown => "INTERNAL_ERROR",
        }
    }

    /// Whether repeating the same request may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::Validation
                | Self::Authentication
                | Self::Authorization
                | Self::NotFound
                | Self::BusinessRuleViolation
        )
    }

    /// Whether the failure is attributed to the caller (4xx).
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        self.http_status() < 500
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured context attached to an error.
///
/// Serialized without a tag, so a field context renders as
/// `{"field": .., "value": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorContext {
    /// The input field that failed.
    Field {
        /// Field name.
        field: String,
        /// Offending value, if it is safe to echo.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// The resource an operation targeted.
    Resource {
        /// Resource type (e.g. `user`).
        resource: String,
        /// Identifier that was looked up.
        identifier: String,
    },
    /// The business rule that rejected the operation.
    Rule {
        /// Rule name.
        rule: String,
        /// Rule-specific details.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        details: Map<String, Value>,
    },
}

impl ErrorContext {
    /// Field context.
    #[must_use]
    pub fn field(field: impl Into<String>, value: Option<Value>) -> Self {
        Self::Field {
            field: field.into(),
            value,
        }
    }

    /// Resource context.
    #[must_use]
    pub fn resource(resource: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            identifier: identifier.into(),
        }
    }

    /// Rule context with no details.
    #[must_use]
    pub fn rule(rule: impl Into<String>) -> Self {
        Self::Rule {
            rule: rule.into(),
            details: Map::new(),
        }
    }

    /// Add a detail to a rule context. No-op on other variants.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Self::Rule { details, .. } = &mut self {
            details.insert(key.into(), value.into());
        }
        self
    }

    /// Copy with sensitive values replaced by the redaction marker.
    #[must_use]
    pub fn redacted(&self) -> Self {
        match self {
            Self::Field { field, value } => {
                let value = if redact::is_sensitive_field(field) {
                    value.as_ref().map(|_| Value::String(redact::REDACTED.to_string()))
                } else {
                    value.as_ref().map(redact::redact_json)
                };
                Self::Field {
                    field: field.clone(),
                    value,
                }
            }
            Self::Resource { .. } => self.clone(),
            Self::Rule { rule, details } => {
                let details = match redact::redact_json(&Value::Object(details.clone())) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                Self::Rule {
                    rule: rule.clone(),
                    details,
                }
            }
        }
    }
}

/// A classified error carrying everything a host needs to render and log it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    kind: ErrorKind,
    code: Cow<'static, str>,
    message: String,
    timestamp: DateTime<Utc>,
    context: Option<ErrorContext>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl AppError {
    /// Create an error of the given kind with the kind's default code.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: Cow::Borrowed(kind.code()),
            message: message.into(),
            timestamp: Utc::now(),
            context: None,
            source: None,
        }
    }

    /// Malformed input.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Malformed input in a specific field.
    #[must_use]
    pub fn invalid_field(field: impl Into<String>, value: Option<Value>, message: impl Into<String>) -> Self {
        Self::validation(message).with_context(ErrorContext::field(field, value))
    }

    /// Authentication failure.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Authorization failure.
    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    /// Missing resource.
    #[must_use]
    pub fn not_found(resource: impl Into<String>, identifier: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ErrorKind::NotFound, format!("{resource} not found"))
            .with_context(ErrorContext::resource(resource, identifier))
    }

    /// Uniqueness conflict on a field.
    #[must_use]
    pub fn conflict(resource: &str, field: impl Into<String>, value: impl Into<String>) -> Self {
        let field = field.into();
        let value = value.into();
        Self::new(
            ErrorKind::Conflict,
            format!("{resource} with {field} '{value}' already exists"),
        )
        .with_context(ErrorContext::field(field, Some(Value::String(value))))
    }

    /// A business rule rejected the operation.
    #[must_use]
    pub fn business_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessRuleViolation, message).with_context(ErrorContext::rule(rule))
    }

    /// Rate limit exceeded.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(ErrorKind::RateLimit, "Too many requests").with_context(
            ErrorContext::rule("rate_limit").with_detail("retryAfterSecs", retry_after.as_secs()),
        )
    }

    /// Downstream service failure.
    #[must_use]
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        let service = service.into();
        Self::new(ErrorKind::ExternalService, message)
            .with_context(ErrorContext::resource("service", service))
    }

    /// Operation exceeded its time budget.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorKind::OperationTimeout,
            format!("Operation '{operation}' timed out"),
        )
        .with_context(
            ErrorContext::rule("timeout")
                .with_detail("operation", operation)
                .with_detail("timeoutMs", u64::try_from(after.as_millis()).unwrap_or(u64::MAX)),
        )
    }

    /// Unclassified failure.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Override the stable code.
    #[must_use]
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Cow::Borrowed(code);
        self
    }

    /// Attach structured context.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// When the error was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Structured context, unredacted.
    #[must_use]
    pub const fn context(&self) -> Option<&ErrorContext> {
        self.context.as_ref()
    }

    /// Transport status.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// Whether the caller may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Render for a transport layer.
    ///
    /// Context is redacted. Internal failures keep their code but replace
    /// the message, so backend details never reach a caller.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        let message = if self.kind == ErrorKind::Unknown {
            INTERNAL_MESSAGE.to_string()
        } else {
            self.message.clone()
        };

        ErrorResponse {
            http_status: self.http_status(),
            code: self.code.to_string(),
            message,
            details: self
                .context
                .as_ref()
                .and_then(|c| serde_json::to_value(c.redacted()).ok()),
        }
    }

    /// Emit one structured log event for this error.
    ///
    /// Context, message and request data all pass through redaction first.
    pub fn log(&self, request: Option<&RequestLogContext>) {
        let message = redact::scrub_secrets(&self.message, redact::COMMON_SECRET_PATTERNS);
        let details = self
            .context
            .as_ref()
            .and_then(|c| serde_json::to_string(&c.redacted()).ok())
            .unwrap_or_default();
        let request = request.map(RequestLogContext::to_json).unwrap_or_default();
        let source = self
            .source
            .as_ref()
            .map(|s| redact::scrub_secrets(&s.to_string(), redact::COMMON_SECRET_PATTERNS))
            .unwrap_or_default();

        if self.kind.is_client_error() {
            tracing::warn!(
                code = %self.code,
                status = self.http_status(),
                retryable = self.is_retryable(),
                details = %details,
                request = %request,
                source = %source,
                "{message}"
            );
        } else {
            tracing::error!(
                code = %self.code,
                status = self.http_status(),
                retryable = self.is_retryable(),
                details = %details,
                request = %request,
                source = %source,
                "{message}"
            );
        }
    }
}

/// Transport-ready error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Transport status.
    pub http_status: u16,
    /// Stable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Redacted structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_status_table() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::Authentication.http_status(), 401);
        assert_eq!(ErrorKind::Authorization.http_status(), 403);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Conflict.http_status(), 409);
        assert_eq!(ErrorKind::BusinessRuleViolation.http_status(), 409);
        assert_eq!(ErrorKind::RateLimit.http_status(), 429);
        assert_eq!(ErrorKind::ExternalService.http_status(), 502);
        assert_eq!(ErrorKind::OperationTimeout.http_status(), 504);
        assert_eq!(ErrorKind::Unknown.http_status(), 500);
    }

    #[test]
    fn test_retry_classes() {
        let retryable: Vec<ErrorKind> = ErrorKind::ALL
            .into_iter()
            .filter(|k| k.is_retryable())
            .collect();
        assert_eq!(
            retryable,
            vec![
                ErrorKind::Conflict,
                ErrorKind::RateLimit,
                ErrorKind::ExternalService,
                ErrorKind::OperationTimeout,
                ErrorKind::Unknown,
            ]
        );
    }

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<&str> = ErrorKind::ALL.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), ErrorKind::ALL.len());
    }

    #[test]
    fn test_not_found_context() {
        let err = AppError::not_found("user", "user-1");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "user not found");

        let response = err.to_response();
        assert_eq!(response.http_status, 404);
        assert_eq!(response.code, "NOT_FOUND");
        assert_eq!(
            response.details,
            Some(json!({"resource": "user", "identifier": "user-1"}))
        );
    }

    #[test]
    fn test_conflict_field_context() {
        let response = AppError::conflict("user", "username", "admin").to_response();
        assert_eq!(response.http_status, 409);
        assert_eq!(response.message, "user with username 'admin' already exists");
        assert_eq!(
            response.details,
            Some(json!({"field": "username", "value": "admin"}))
        );
    }

    #[test]
    fn test_sensitive_field_value_redacted() {
        let err = AppError::invalid_field("password", Some(json!("hunter2")), "too short");
        let response = err.to_response();
        assert_eq!(
            response.details,
            Some(json!({"field": "password", "value": "[REDACTED]"}))
        );

        // The original context is untouched
        assert_eq!(
            err.context(),
            Some(&ErrorContext::field("password", Some(json!("hunter2"))))
        );
    }

    #[test]
    fn test_rule_details_redacted() {
        let err = AppError::business_rule("x", "rejected").with_context(
            ErrorContext::rule("x")
                .with_detail("token", "abc")
                .with_detail("userId", "u1"),
        );
        assert_eq!(
            err.to_response().details,
            Some(json!({"rule": "x", "details": {"token": "[REDACTED]", "userId": "u1"}}))
        );
    }

    #[test]
    fn test_unknown_message_hidden() {
        let err = AppError::unknown("sled: corrupted page at offset 42");
        let response = err.to_response();
        assert_eq!(response.http_status, 500);
        assert_eq!(response.code, "INTERNAL_ERROR");
        assert_eq!(response.message, "Internal server error");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_code_override_and_source() {
        let io = std::io::Error::other("disk gone");
        let err = AppError::validation("bad reference")
            .with_code("INVALID_REFERENCE")
            .with_source(io);

        assert_eq!(err.code(), "INVALID_REFERENCE");
        assert_eq!(err.kind().code(), "VALIDATION_ERROR");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk gone"));
    }

    #[test]
    fn test_timeout_and_rate_limit_context() {
        let err = AppError::timeout("token.sign", Duration::from_millis(1500));
        assert_eq!(err.http_status(), 504);
        assert_eq!(
            err.to_response().details,
            Some(json!({"rule": "timeout", "details": {"operation": "token.sign", "timeoutMs": 1500}}))
        );

        let err = AppError::rate_limited(Duration::from_secs(30));
        assert_eq!(err.http_status(), 429);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let response = AppError::authentication("Invalid credentials").to_response();
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"httpStatus": 401, "code": "AUTHENTICATION_ERROR", "message": "Invalid credentials"})
        );
    }
}
