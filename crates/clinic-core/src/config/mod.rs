//! Configuration loading and validation.
//!
//! JSON5 format, camelCase keys, every field defaulted.
//! Config location: `~/.clinic/clinic.json`

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{SecretBox, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;
use crate::types::{self, PageRequest};

/// Default signing secret. Rejected by [`AuthConfig::signing_secret`].
pub const PLACEHOLDER_SECRET: &str = "change-me-before-deploying";

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Default token expiry in hours.
const DEFAULT_TOKEN_EXPIRY_HOURS: u64 = 24;

/// Longest token expiry accepted, in hours (one year).
pub const MAX_TOKEN_EXPIRY_HOURS: u64 = 24 * 366;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The signing secret is missing, a placeholder, or too short.
    #[error("Insecure signing secret: {0}")]
    InsecureSecret(&'static str),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::unknown(err.to_string())
            .with_code("CONFIGURATION_ERROR")
            .with_source(err)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Token issuance and verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Persistent storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// List endpoint paging.
    #[serde(default)]
    pub pagination: PaginationConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from JSON5 text.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid JSON5 or fails validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("clinic.json")
    }

    /// Get the state directory.
    ///
    /// Uses `CLINIC_STATE_DIR` env var if set, otherwise `~/.clinic`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CLINIC_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".clinic")
        } else {
            PathBuf::from(".clinic")
        }
    }

    /// Directory holding the identity database.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("identity"))
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognized: `CLINIC_JWT_SECRET`, `CLINIC_DATA_DIR`,
    /// `CLINIC_TOKEN_EXPIRY_HOURS`.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secret) = lookup("CLINIC_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Some(dir) = lookup("CLINIC_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(hours) = lookup("CLINIC_TOKEN_EXPIRY_HOURS") {
            match hours.parse() {
                Ok(hours) => self.auth.token_expiry_hours = hours,
                Err(_) => tracing::warn!(value = %hours, "Ignoring invalid CLINIC_TOKEN_EXPIRY_HOURS"),
            }
        }

        self
    }

    /// Validate the configuration.
    ///
    /// The signing secret is checked separately, when a signer is built.
    ///
    /// # Errors
    ///
    /// Returns error on out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.token_expiry()?;

        if self.pagination.max_limit == 0 {
            return Err(ConfigError::Validation(
                "pagination.maxLimit cannot be 0".to_string(),
            ));
        }

        if self.pagination.default_limit > self.pagination.max_limit {
            return Err(ConfigError::Validation(format!(
                "pagination.defaultLimit ({}) exceeds maxLimit ({})",
                self.pagination.default_limit, self.pagination.max_limit
            )));
        }

        Ok(())
    }
}

/// Token configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Symmetric signing secret. The default is a placeholder.
    #[serde(default = "default_secret")]
    pub jwt_secret: String,

    /// Access token expiry in hours.
    #[serde(default = "default_token_expiry")]
    pub token_expiry_hours: u64,

    /// Clock skew tolerated when checking expiry, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
}

fn default_secret() -> String {
    PLACEHOLDER_SECRET.to_string()
}

const fn default_token_expiry() -> u64 {
    DEFAULT_TOKEN_EXPIRY_HOURS
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_secret(),
            token_expiry_hours: default_token_expiry(),
            leeway_secs: 0,
        }
    }
}

impl AuthConfig {
    /// Create a new auth config builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Get token expiry as Duration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if the expiry is 0 or above
    /// [`MAX_TOKEN_EXPIRY_HOURS`].
    pub fn token_expiry(&self) -> Result<Duration, ConfigError> {
        let hours = self.token_expiry_hours;
        if hours == 0 {
            return Err(ConfigError::Validation(
                "auth.tokenExpiryHours cannot be 0".to_string(),
            ));
        }
        if hours > MAX_TOKEN_EXPIRY_HOURS {
            return Err(ConfigError::Validation(format!(
                "auth.tokenExpiryHours ({hours}) exceeds {MAX_TOKEN_EXPIRY_HOURS}"
            )));
        }

        hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Validation(format!("auth.tokenExpiryHours ({hours}) overflows")))
    }

    /// Whether the secret is still the shipped placeholder.
    #[must_use]
    pub fn uses_placeholder_secret(&self) -> bool {
        self.jwt_secret == PLACEHOLDER_SECRET
    }

    /// The signing secret, if it is safe to use.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InsecureSecret` if the secret is empty, the
    /// placeholder, or shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn signing_secret(&self) -> Result<SecretString, ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::InsecureSecret("secret is not set"));
        }
        if self.uses_placeholder_secret() {
            return Err(ConfigError::InsecureSecret(
                "secret is the placeholder; set auth.jwtSecret or CLINIC_JWT_SECRET",
            ));
        }
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InsecureSecret("secret is shorter than 32 bytes"));
        }

        Ok(SecretBox::new(self.jwt_secret.clone().into_boxed_str()))
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &crate::redact::REDACTED)
            .field("token_expiry_hours", &self.token_expiry_hours)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the signing secret.
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = secret.into();
        self
    }

    /// Set token expiry in hours.
    #[must_use]
    pub const fn token_expiry_hours(mut self, hours: u64) -> Self {
        self.config.token_expiry_hours = hours;
        self
    }

    /// Set expiry leeway in seconds.
    #[must_use]
    pub const fn leeway_secs(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        self.config
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Directory for the identity database. Defaults under the state dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Paging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationConfig {
    /// Page size when none is requested.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Largest page size a caller may request.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
}

const fn default_limit() -> u32 {
    types::DEFAULT_LIMIT
}

const fn default_max_limit() -> u32 {
    types::MAX_LIMIT
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl PaginationConfig {
    /// Build a page request from optional query values.
    #[must_use]
    pub fn page(&self, page: Option<u32>, limit: Option<u32>) -> PageRequest {
        PageRequest::with_max(
            page.unwrap_or(types::DEFAULT_PAGE),
            limit.unwrap_or(self.default_limit),
            self.max_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use tempfile::tempdir;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.auth.token_expiry_hours, 24);
        assert_eq!(config.auth.token_expiry().unwrap(), Duration::from_secs(24 * 3600));
        assert!(config.auth.uses_placeholder_secret());
        assert_eq!(config.pagination.default_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_placeholder_secret_rejected() {
        let config = AuthConfig::default();
        assert!(matches!(
            config.signing_secret(),
            Err(ConfigError::InsecureSecret(_))
        ));

        let short = AuthConfig::builder().jwt_secret("short").build();
        assert!(short.signing_secret().is_err());

        let empty = AuthConfig::builder().jwt_secret("").build();
        assert!(empty.signing_secret().is_err());
    }

    #[test]
    fn test_signing_secret() {
        let config = AuthConfig::builder().jwt_secret(SECRET).build();
        let secret = config.signing_secret().unwrap();
        assert_eq!(secret.expose_secret(), SECRET);
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = AuthConfig::builder().jwt_secret(SECRET).build();
        let debug = format!("{config:?}");
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_parse_json5() {
        let config = Config::parse(
            r#"{
                // comments are allowed
                auth: { jwtSecret: "0123456789abcdef0123456789abcdef", tokenExpiryHours: 12 },
                pagination: { maxLimit: 50 },
            }"#,
        )
        .unwrap();

        assert_eq!(config.auth.token_expiry_hours, 12);
        assert_eq!(config.auth.leeway_secs, 0);
        assert_eq!(config.pagination.max_limit, 50);
        assert_eq!(config.pagination.default_limit, 10);
    }

    #[test]
    fn test_validation() {
        let result = Config::parse("{ auth: { tokenExpiryHours: 0 } }");
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        let result = Config::parse("{ pagination: { defaultLimit: 20, maxLimit: 5 } }");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_token_expiry_bounds() {
        let result = Config::parse("{ auth: { tokenExpiryHours: 10000000000 } }");
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        for hours in [0, MAX_TOKEN_EXPIRY_HOURS + 1, u64::MAX / 1000, u64::MAX] {
            let auth = AuthConfig::builder().token_expiry_hours(hours).build();
            assert!(matches!(auth.token_expiry(), Err(ConfigError::Validation(_))));
        }

        let longest = AuthConfig::builder()
            .token_expiry_hours(MAX_TOKEN_EXPIRY_HOURS)
            .build();
        assert_eq!(
            longest.token_expiry().unwrap(),
            Duration::from_secs(MAX_TOKEN_EXPIRY_HOURS * 3600)
        );
    }

    #[test]
    fn test_overrides_can_invalidate() {
        let config = Config::default()
            .with_overrides(|name| (name == "CLINIC_TOKEN_EXPIRY_HOURS").then(|| "0".to_string()));
        assert_eq!(config.auth.token_expiry_hours, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CLINIC_JWT_SECRET", SECRET),
            ("CLINIC_DATA_DIR", "/var/lib/clinic"),
            ("CLINIC_TOKEN_EXPIRY_HOURS", "not-a-number"),
        ]);

        let config = Config::default().with_overrides(|name| vars.get(name).map(ToString::to_string));

        assert_eq!(config.auth.jwt_secret, SECRET);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/clinic"));
        assert_eq!(config.auth.token_expiry_hours, 24);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("clinic.json");

        let mut config = Config::default();
        config.auth.token_expiry_hours = 6;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.auth.token_expiry_hours, 6);
    }

    #[test]
    fn test_pagination_page() {
        let pagination = PaginationConfig {
            default_limit: 5,
            max_limit: 20,
        };
        assert_eq!(pagination.page(None, None), PageRequest { page: 1, limit: 5 });
        assert_eq!(pagination.page(Some(2), Some(99)).limit, 20);
    }

    #[test]
    fn test_config_error_maps_to_internal() {
        let err: AppError = ConfigError::InsecureSecret("x").into();
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
