//! Redaction of credentials before anything reaches a log sink.
//!
//! - `redact_headers`: replace values of sensitive header names
//! - `redact_json`: replace values of sensitive body fields, recursively
//! - `scrub_secrets`: redact secrets embedded in free text
//! - `RequestLogContext`: request data that is redacted on construction

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// Replacement for every redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// Header names whose values are never logged.
pub const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key"];

/// Body field names whose values are never logged.
pub const SENSITIVE_FIELDS: &[&str] = &["password", "token", "secret", "key", "credentials"];

/// Common secret patterns to scrub from free text.
pub const COMMON_SECRET_PATTERNS: &[&str] = &[
    "password=",
    "token=",
    "secret=",
    "api_key=",
    "Authorization: Bearer ",
    "Authorization: Basic ",
    "x-api-key: ",
];

/// Whether a header name is sensitive (case-insensitive).
#[must_use]
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Whether a body field name is sensitive (case-insensitive).
#[must_use]
pub fn is_sensitive_field(name: &str) -> bool {
    SENSITIVE_FIELDS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(name))
}

/// Copy a header map with sensitive values replaced.
#[must_use]
pub fn redact_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            let value = if is_sensitive_header(&name) {
                REDACTED.to_string()
            } else {
                value.to_string()
            };
            (name, value)
        })
        .collect()
}

/// Copy a JSON value with sensitive fields replaced, at any depth.
#[must_use]
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_field(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_json(v)
                    };
                    (k.clone(), v)
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

/// Scrub secrets from error messages and logs.
///
/// Replaces values after known secret patterns with `[REDACTED]`.
#[must_use]
pub fn scrub_secrets(text: &str, patterns: &[&str]) -> String {
    let mut result = text.to_string();

    for pattern in patterns {
        let mut search_start = 0;
        while let Some(start) = result[search_start..].find(pattern) {
            let abs_start = search_start + start + pattern.len();

            // Value ends at whitespace, a quote, or a separator
            let end = result[abs_start..]
                .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '&' || c == ',')
                .map_or(result.len(), |e| abs_start + e);

            result.replace_range(abs_start..end, REDACTED);

            search_start = abs_start + REDACTED.len();
        }
    }

    result
}

/// Request data attached to an error log event.
///
/// Headers and body are redacted when the context is built, so an
/// unredacted copy never exists inside it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestLogContext {
    /// Request method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Redacted headers, lowercase names.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Redacted body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestLogContext {
    /// Create a context for a method and path.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Attach headers (redacted).
    #[must_use]
    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.headers = redact_headers(headers);
        self
    }

    /// Attach a body (redacted).
    #[must_use]
    pub fn with_body(mut self, body: &Value) -> Self {
        self.body = Some(redact_json(body));
        self
    }

    /// Serialize for a log field.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
