//! Bearer-token extractors for axum.

use std::marker::PhantomData;
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use clinic_core::RequestLogContext;
use clinic_identity::{ADMIN_ROLE, AuthService, IdentityError, TokenManager, User};

use crate::error::ApiError;

/// Shared authentication state.
#[derive(Debug, Clone)]
pub struct AuthState {
    /// Token and credential checks.
    pub auth: AuthService,
}

impl AuthState {
    /// Create a new auth state.
    #[must_use]
    pub const fn new(auth: AuthService) -> Self {
        Self { auth }
    }
}

/// Redacted log context for a request.
#[must_use]
pub fn request_log_context(parts: &Parts) -> RequestLogContext {
    RequestLogContext::new(parts.method.as_str(), parts.uri.path()).with_headers(
        parts
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("<binary>"))),
    )
}

async fn authenticate(parts: &Parts, state: &AuthState) -> Result<User, ApiError> {
    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(TokenManager::extract_from_header);

    let result = match token {
        Some(token) => state.auth.authenticate(token).await,
        None => Err(IdentityError::InvalidToken),
    };

    let user = result.map_err(|e| ApiError::from(e).with_request(request_log_context(parts)))?;
    tracing::debug!(user_id = %user.id, path = %parts.uri.path(), "Request authenticated");
    Ok(user)
}

/// The authenticated user, resolved fresh from the store.
///
/// Use this in handler parameters to require authentication.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    /// The user.
    #[must_use]
    pub const fn user(&self) -> &User {
        &self.0
    }

    /// Require a permission. Administrators pass every check.
    ///
    /// # Errors
    ///
    /// Returns a 403 error if the permission is missing.
    pub fn require_permission(&self, name: &str) -> Result<(), ApiError> {
        AuthService::require_permission(&self.0, name).map_err(ApiError::from)
    }

    /// Require a role.
    ///
    /// # Errors
    ///
    /// Returns a 403 error if the role is missing.
    pub fn require_role(&self, name: &str) -> Result<(), ApiError> {
        AuthService::require_role(&self.0, name).map_err(ApiError::from)
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    Arc<AuthState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = Arc::<AuthState>::from_ref(state);
        authenticate(parts, &auth_state).await.map(CurrentUser)
    }
}

/// Authentication if present.
///
/// `None` if no valid token is present.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<User>);

impl<S> FromRequestParts<S> for OptionalUser
where
    S: Send + Sync,
    Arc<AuthState>: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = Arc::<AuthState>::from_ref(state);
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(TokenManager::extract_from_header);

        let user = match token {
            Some(token) => auth_state.auth.validate_token(token).await.ok().flatten(),
            None => None,
        };
        Ok(Self(user))
    }
}

/// Require the administrator role.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub User);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    Arc<AuthState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        AuthService::require_role(&user, ADMIN_ROLE)
            .map_err(|e| ApiError::from(e).with_request(request_log_context(parts)))?;
        Ok(Self(user))
    }
}

/// A permission name known at compile time.
pub trait PermissionName: Send + Sync + 'static {
    /// The permission name.
    const NAME: &'static str;
}

/// Require a permission named by `P`.
///
/// ```ignore
/// struct UserManagement;
/// impl PermissionName for UserManagement {
///     const NAME: &'static str = "user_management";
/// }
///
/// async fn list_users(RequirePermission(user, ..): RequirePermission<UserManagement>) {}
/// ```
#[derive(Debug, Clone)]
pub struct RequirePermission<P>(pub User, pub PhantomData<P>);

impl<S, P> FromRequestParts<S> for RequirePermission<P>
where
    S: Send + Sync,
    P: PermissionName,
    Arc<AuthState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        AuthService::require_permission(&user, P::NAME)
            .map_err(|e| ApiError::from(e).with_request(request_log_context(parts)))?;
        Ok(Self(user, PhantomData))
    }
}
