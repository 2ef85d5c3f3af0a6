//! Signed bearer tokens.

use std::time::Duration;

use chrono::{DateTime, Utc};
use clinic_core::AuthConfig;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::models::User;

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// Username at issue time.
    pub username: String,
    /// Role names at issue time.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWS.
    pub token: String,
    /// Expiration.
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry: Duration,
    leeway_secs: u64,
}

impl TokenManager {
    /// Create a manager from raw secret bytes.
    #[must_use]
    pub fn new(secret: &[u8], expiry: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expiry,
            leeway_secs: 0,
        }
    }

    /// Create a manager from auth configuration.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Config` if the configured secret is unsafe
    /// or the expiry is out of range.
    pub fn from_config(config: &AuthConfig) -> Result<Self, IdentityError> {
        let secret = config.signing_secret()?;
        let expiry = config.token_expiry()?;
        Ok(Self::new(secret.expose_secret().as_bytes(), expiry).with_leeway(config.leeway_secs))
    }

    /// Accept tokens up to `secs` past their expiry.
    #[must_use]
    pub const fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// Token lifetime.
    #[must_use]
    pub const fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Generate a random 256-bit secret.
    #[must_use]
    pub fn generate_secret() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    /// Generate a random secret as a hex string.
    #[must_use]
    pub fn generate_hex_secret() -> String {
        hex::encode(Self::generate_secret())
    }

    /// Sign a token for a user.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Token` if the expiry is out of range or
    /// encoding fails.
    pub fn issue(&self, user: &User) -> Result<IssuedToken, IdentityError> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(self.expiry)
            .ok()
            .and_then(|expiry| now.checked_add_signed(expiry))
            .ok_or_else(|| IdentityError::Token(format!("Expiry out of range: {:?}", self.expiry)))?;

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            roles: user.role_names(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::Token(format!("Encoding failed: {e}")))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify signature and expiry. Any failure yields `None`.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "Token rejected");
                None
            }
        }
    }

    /// Extract the token from an `Authorization` header value.
    ///
    /// Expects format: "Bearer <token>"
    #[must_use]
    pub fn extract_from_header(header: &str) -> Option<&str> {
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("expiry", &self.expiry)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}
