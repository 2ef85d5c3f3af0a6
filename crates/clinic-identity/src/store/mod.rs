//! Persistence seams for the identity model.
//!
//! Stores perform no referential checks: every id in a descriptor is assumed
//! to exist. Callers that accept ids from outside go through
//! [`IdentityService`](crate::IdentityService), which checks first.

mod db;
mod permissions;
mod roles;
mod users;

use async_trait::async_trait;
use clinic_core::{PageRequest, Paginated};

use crate::error::IdentityError;
use crate::models::{
    CreatePermission, CreateRole, CreateUser, Permission, PermissionId, Role, RoleId,
    UpdatePermission, UpdateRole, UpdateUser, User, UserId,
};

pub use self::db::IdentityDb;
pub use self::permissions::SledPermissionStore;
pub use self::roles::SledRoleStore;
pub use self::users::SledUserStore;

/// Permission persistence.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Insert a permission.
    async fn create(&self, input: CreatePermission) -> Result<Permission, IdentityError>;

    /// Get by id.
    async fn find_by_id(&self, id: &PermissionId) -> Result<Option<Permission>, IdentityError>;

    /// Get by unique name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>, IdentityError>;

    /// Get the oldest permission with this resource and action.
    async fn find_by_resource_and_action(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, IdentityError>;

    /// One page, newest first.
    async fn find_all(&self, page: PageRequest) -> Result<Paginated<Permission>, IdentityError>;

    /// Apply a partial update. `None` if the id is unknown.
    async fn update(
        &self,
        id: &PermissionId,
        input: UpdatePermission,
    ) -> Result<Option<Permission>, IdentityError>;

    /// Delete with its grants. `false` if the id is unknown.
    async fn delete(&self, id: &PermissionId) -> Result<bool, IdentityError>;

    /// The subset of `ids` that exist.
    async fn find_by_ids(&self, ids: &[PermissionId]) -> Result<Vec<Permission>, IdentityError>;
}

/// Role persistence. Roles are returned with their permissions resolved.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a role with its grants.
    async fn create(&self, input: CreateRole) -> Result<Role, IdentityError>;

    /// Get by id.
    async fn find_by_id(&self, id: &RoleId) -> Result<Option<Role>, IdentityError>;

    /// Get by unique name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>, IdentityError>;

    /// One page, newest first.
    async fn find_all(&self, page: PageRequest) -> Result<Paginated<Role>, IdentityError>;

    /// Apply a partial update. A supplied permission list replaces all grants.
    async fn update(&self, id: &RoleId, input: UpdateRole) -> Result<Option<Role>, IdentityError>;

    /// Delete with its grants and assignments. `false` if the id is unknown.
    async fn delete(&self, id: &RoleId) -> Result<bool, IdentityError>;

    /// The subset of `ids` that exist.
    async fn find_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, IdentityError>;
}

/// User persistence. Users are returned with roles and permissions resolved.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user, hashing the password.
    async fn create(&self, input: CreateUser) -> Result<User, IdentityError>;

    /// Get by id.
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, IdentityError>;

    /// Get by unique username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, IdentityError>;

    /// Get by unique email (case-insensitive).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError>;

    /// One page, newest first.
    async fn find_all(&self, page: PageRequest) -> Result<Paginated<User>, IdentityError>;

    /// Apply a partial update. A supplied role list replaces all assignments.
    async fn update(&self, id: &UserId, input: UpdateUser) -> Result<Option<User>, IdentityError>;

    /// Delete with its assignments. `false` if the id is unknown.
    async fn delete(&self, id: &UserId) -> Result<bool, IdentityError>;

    /// The subset of `ids` that exist.
    async fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, IdentityError>;

    /// Whether the password matches. Unknown usernames yield `false`.
    async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, IdentityError>;

    /// Stamp `lastLoginAt`. `None` if the id is unknown.
    async fn record_login(&self, id: &UserId) -> Result<Option<User>, IdentityError>;
}
