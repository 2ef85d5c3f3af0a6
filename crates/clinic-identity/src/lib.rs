//! # Clinic Identity
//!
//! Users, roles and permissions for the clinic platform.
//!
//! This crate provides:
//! - Sled-backed stores with atomic association replace and cascading deletes
//! - An identity service that checks references and business rules before writing
//! - Credential validation, stateless bearer tokens and permission predicates

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod error;
mod identity;
pub mod jwt;
pub mod models;
pub mod password;
pub mod store;

pub use auth::{AuthService, LoginResponse};
pub use error::IdentityError;
pub use identity::IdentityService;
pub use jwt::{Claims, IssuedToken, TokenManager};
pub use models::{
    ADMIN_ROLE, CreatePermission, CreateRole, CreateUser, Credentials, Permission, PermissionId,
    PermissionRef, Role, RoleId, RoleRef, UpdatePermission, UpdateRole, UpdateUser, User, UserId,
};
pub use password::{Argon2Hasher, PasswordHasher};
pub use store::{
    IdentityDb, PermissionStore, RoleStore, SledPermissionStore, SledRoleStore, SledUserStore,
    UserStore,
};

use std::path::Path;
use std::sync::Arc;

use clinic_core::Config;

/// Stores and services wired over one database.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The shared database.
    pub db: IdentityDb,
    /// Identity management.
    pub identity: IdentityService,
    /// Authentication.
    pub auth: AuthService,
}

impl Identity {
    /// Wire everything from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or the signing secret
    /// is unsafe.
    pub fn from_config(config: &Config) -> Result<Self, IdentityError> {
        let tokens = TokenManager::from_config(&config.auth)?;
        let db = IdentityDb::open(&config.data_dir())?;
        Ok(Self::with_parts(db, tokens, Arc::new(Argon2Hasher::default())))
    }

    /// Wire everything over a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path, tokens: TokenManager) -> Result<Self, IdentityError> {
        Ok(Self::with_parts(
            IdentityDb::open(path)?,
            tokens,
            Arc::new(Argon2Hasher::default()),
        ))
    }

    /// Wire everything from explicit parts.
    #[must_use]
    pub fn with_parts(db: IdentityDb, tokens: TokenManager, hasher: Arc<dyn PasswordHasher>) -> Self {
        let users: Arc<dyn UserStore> = Arc::new(SledUserStore::with_hasher(db.clone(), hasher));
        let roles: Arc<dyn RoleStore> = Arc::new(SledRoleStore::new(db.clone()));
        let permissions: Arc<dyn PermissionStore> = Arc::new(SledPermissionStore::new(db.clone()));

        Self {
            identity: IdentityService::new(users.clone(), roles, permissions),
            auth: AuthService::new(users, tokens),
            db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn tokens() -> TokenManager {
        TokenManager::new(&TokenManager::generate_secret(), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::with_params(1024, 1, 1).unwrap());

        let user_id = {
            let wired = Identity::with_parts(IdentityDb::open(dir.path()).unwrap(), tokens(), hasher.clone());
            let role = wired.identity.create_role(CreateRole::new("USER")).await.unwrap();
            wired
                .identity
                .create_user(CreateUser::new("jdoe", "jdoe@example.com", "password123").with_roles(vec![role.id]))
                .await
                .unwrap()
                .id
        };

        let wired = Identity::with_parts(IdentityDb::open(dir.path()).unwrap(), tokens(), hasher);
        let user = wired.identity.get_user(&user_id).await.unwrap();
        assert_eq!(user.role_names(), vec!["USER".to_string()]);
        assert!(
            wired
                .auth
                .validate_user(&Credentials::new("jdoe", "password123"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_from_config_requires_real_secret() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.path().join("identity"));

        assert!(matches!(Identity::from_config(&config), Err(IdentityError::Config(_))));

        config.auth.jwt_secret = TokenManager::generate_hex_secret();
        let wired = Identity::from_config(&config).unwrap();
        assert!(wired.db.has_no_users());
    }
}
