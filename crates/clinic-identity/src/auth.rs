//! Credential validation, token sessions and permission predicates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::jwt::TokenManager;
use crate::models::{Credentials, User, UserId};
use crate::store::UserStore;

/// Result of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// The user, unchanged.
    pub user: User,
    /// Signed bearer token.
    pub access_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// Authentication over a user store and a token signer.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: TokenManager,
}

impl AuthService {
    /// Create a service.
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, tokens: TokenManager) -> Self {
        Self { users, tokens }
    }

    /// The token signer.
    #[must_use]
    pub const fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Check credentials and stamp the login time.
    ///
    /// Unknown user, wrong password and inactive account all yield `None`.
    ///
    /// # Errors
    ///
    /// Storage failure only.
    pub async fn validate_user(&self, credentials: &Credentials) -> Result<Option<User>, IdentityError> {
        if !self
            .users
            .validate_credentials(&credentials.username, &credentials.password)
            .await?
        {
            tracing::debug!(username = %credentials.username, "Credential check failed");
            return Ok(None);
        }

        let user = match self.users.find_by_username(&credentials.username).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::debug!(username = %credentials.username, "User missing or inactive");
                return Ok(None);
            }
        };

        self.users.record_login(&user.id).await
    }

    /// Issue a token for an already validated user.
    ///
    /// # Errors
    ///
    /// Token signing failure.
    pub async fn login(&self, user: User) -> Result<LoginResponse, IdentityError> {
        let issued = self.tokens.issue(&user)?;
        tracing::info!(user_id = %user.id, username = %user.username, "Token issued");

        Ok(LoginResponse {
            user,
            access_token: issued.token,
            token_type: "Bearer".to_string(),
            expires_at: issued.expires_at,
        })
    }

    /// Validate credentials and issue a token.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for any credential failure, or storage or
    /// signing failure.
    pub async fn login_with_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<LoginResponse, IdentityError> {
        match self.validate_user(credentials).await? {
            Some(user) => self.login(user).await,
            None => {
                tracing::warn!(username = %credentials.username, "Login rejected");
                Err(IdentityError::InvalidCredentials)
            }
        }
    }

    /// Verify a token and resolve its subject from the store.
    ///
    /// Invalid, expired and orphaned tokens all yield `None`. The account's
    /// active flag is not consulted.
    ///
    /// # Errors
    ///
    /// Storage failure only.
    pub async fn validate_token(&self, token: &str) -> Result<Option<User>, IdentityError> {
        let Some(claims) = self.tokens.verify(token) else {
            return Ok(None);
        };

        self.users.find_by_id(&UserId::new(claims.sub)).await
    }

    /// Like [`AuthService::validate_token`], failing with `InvalidToken`.
    ///
    /// # Errors
    ///
    /// `InvalidToken` or storage failure.
    pub async fn authenticate(&self, token: &str) -> Result<User, IdentityError> {
        self.validate_token(token)
            .await?
            .ok_or(IdentityError::InvalidToken)
    }

    /// Whether a user holds a permission. Administrators hold all.
    #[must_use]
    pub fn has_permission(user: &User, name: &str) -> bool {
        user.has_permission(name)
    }

    /// Whether a user holds a role.
    #[must_use]
    pub fn has_role(user: &User, name: &str) -> bool {
        user.has_role(name)
    }

    /// Fail with `PermissionDenied` unless the user holds the permission.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`.
    pub fn require_permission(user: &User, name: &str) -> Result<(), IdentityError> {
        if Self::has_permission(user, name) {
            Ok(())
        } else {
            Err(IdentityError::PermissionDenied(format!("requires permission '{name}'")))
        }
    }

    /// Fail with `PermissionDenied` unless the user holds the role.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`.
    pub fn require_role(user: &User, name: &str) -> Result<(), IdentityError> {
        if Self::has_role(user, name) {
            Ok(())
        } else {
            Err(IdentityError::PermissionDenied(format!("requires role '{name}'")))
        }
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
