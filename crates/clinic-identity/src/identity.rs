//! Referential and business-rule checks in front of the stores.

use std::sync::Arc;

use clinic_core::{PageRequest, Paginated};
use validator::Validate;

use crate::error::IdentityError;
use crate::models::{
    ADMIN_ROLE, CreatePermission, CreateRole, CreateUser, Permission, PermissionId, Role, RoleId,
    UpdatePermission, UpdateRole, UpdateUser, User, UserId,
};
use crate::store::{PermissionStore, RoleStore, UserStore};

/// Identity management over the three stores.
///
/// Every write that names role or permission ids resolves them first; a
/// write naming an unknown id fails before any store is touched.
#[derive(Clone)]
pub struct IdentityService {
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    permissions: Arc<dyn PermissionStore>,
}

/// Ids in request order with repeats removed.
fn distinct<T: Clone + PartialEq>(ids: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

impl IdentityService {
    /// Create a service over the given stores.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleStore>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        Self {
            users,
            roles,
            permissions,
        }
    }

    /// The user store.
    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// The role store.
    #[must_use]
    pub fn roles(&self) -> &Arc<dyn RoleStore> {
        &self.roles
    }

    /// The permission store.
    #[must_use]
    pub fn permissions(&self) -> &Arc<dyn PermissionStore> {
        &self.permissions
    }

    async fn ensure_roles(&self, ids: &[RoleId]) -> Result<(), IdentityError> {
        let wanted = distinct(ids);
        if wanted.is_empty() {
            return Ok(());
        }

        let found = self.roles.find_by_ids(&wanted).await?;
        if found.len() == wanted.len() {
            return Ok(());
        }

        let missing = wanted
            .iter()
            .filter(|id| !found.iter().any(|r| &r.id == *id))
            .map(ToString::to_string)
            .collect();
        Err(IdentityError::UnknownReference {
            resource: "role",
            field: "roles",
            missing,
        })
    }

    async fn ensure_permissions(&self, ids: &[PermissionId]) -> Result<(), IdentityError> {
        let wanted = distinct(ids);
        if wanted.is_empty() {
            return Ok(());
        }

        let found = self.permissions.find_by_ids(&wanted).await?;
        if found.len() == wanted.len() {
            return Ok(());
        }

        let missing = wanted
            .iter()
            .filter(|id| !found.iter().any(|p| &p.id == *id))
            .map(ToString::to_string)
            .collect();
        Err(IdentityError::UnknownReference {
            resource: "permission",
            field: "permissions",
            missing,
        })
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Create a permission.
    ///
    /// # Errors
    ///
    /// Validation failure, duplicate name, or storage failure.
    pub async fn create_permission(&self, input: CreatePermission) -> Result<Permission, IdentityError> {
        input.validate()?;
        let permission = self.permissions.create(input).await?;
        tracing::info!(id = %permission.id, name = %permission.name, "Permission created");
        Ok(permission)
    }

    /// Get a permission or fail with `NotFound`.
    ///
    /// # Errors
    ///
    /// `NotFound` or storage failure.
    pub async fn get_permission(&self, id: &PermissionId) -> Result<Permission, IdentityError> {
        self.permissions
            .find_by_id(id)
            .await?
            .ok_or_else(|| IdentityError::not_found("permission", id.as_str()))
    }

    /// One page of permissions.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn list_permissions(&self, page: PageRequest) -> Result<Paginated<Permission>, IdentityError> {
        self.permissions.find_all(page).await
    }

    /// Update a permission.
    ///
    /// # Errors
    ///
    /// Validation failure, `NotFound`, duplicate name, or storage failure.
    pub async fn update_permission(
        &self,
        id: &PermissionId,
        input: UpdatePermission,
    ) -> Result<Permission, IdentityError> {
        input.validate()?;
        self.permissions
            .update(id, input)
            .await?
            .ok_or_else(|| IdentityError::not_found("permission", id.as_str()))
    }

    /// Delete a permission and its grants.
    ///
    /// # Errors
    ///
    /// `NotFound` or storage failure.
    pub async fn delete_permission(&self, id: &PermissionId) -> Result<(), IdentityError> {
        self.get_permission(id).await?;
        if !self.permissions.delete(id).await? {
            return Err(IdentityError::not_found("permission", id.as_str()));
        }
        tracing::info!(id = %id, "Permission deleted");
        Ok(())
    }

    // ========================================================================
    // Roles
    // ========================================================================

    /// Create a role after resolving its permission ids.
    ///
    /// # Errors
    ///
    /// Validation failure, `UnknownReference`, duplicate name, or storage failure.
    pub async fn create_role(&self, input: CreateRole) -> Result<Role, IdentityError> {
        input.validate()?;
        if let Some(ids) = &input.permissions {
            self.ensure_permissions(ids).await?;
        }

        let role = self.roles.create(input).await?;
        tracing::info!(id = %role.id, name = %role.name, "Role created");
        Ok(role)
    }

    /// Get a role or fail with `NotFound`.
    ///
    /// # Errors
    ///
    /// `NotFound` or storage failure.
    pub async fn get_role(&self, id: &RoleId) -> Result<Role, IdentityError> {
        self.roles
            .find_by_id(id)
            .await?
            .ok_or_else(|| IdentityError::not_found("role", id.as_str()))
    }

    /// One page of roles.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn list_roles(&self, page: PageRequest) -> Result<Paginated<Role>, IdentityError> {
        self.roles.find_all(page).await
    }

    /// Update a role. A supplied permission list replaces all grants.
    ///
    /// # Errors
    ///
    /// Validation failure, `UnknownReference`, `NotFound`, duplicate name, or
    /// storage failure.
    pub async fn update_role(&self, id: &RoleId, input: UpdateRole) -> Result<Role, IdentityError> {
        input.validate()?;
        if let Some(ids) = &input.permissions {
            self.ensure_permissions(ids).await?;
        }

        self.roles
            .update(id, input)
            .await?
            .ok_or_else(|| IdentityError::not_found("role", id.as_str()))
    }

    /// Delete a role with its grants and assignments.
    ///
    /// # Errors
    ///
    /// `NotFound` or storage failure.
    pub async fn delete_role(&self, id: &RoleId) -> Result<(), IdentityError> {
        self.get_role(id).await?;
        if !self.roles.delete(id).await? {
            return Err(IdentityError::not_found("role", id.as_str()));
        }
        tracing::info!(id = %id, "Role deleted");
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Create a user after resolving its role ids.
    ///
    /// # Errors
    ///
    /// Validation failure, `UnknownReference`, duplicate username or email,
    /// or storage failure.
    pub async fn create_user(&self, input: CreateUser) -> Result<User, IdentityError> {
        input.validate()?;
        if let Some(ids) = &input.roles {
            self.ensure_roles(ids).await?;
        }

        let user = self.users.create(input).await?;
        tracing::info!(id = %user.id, username = %user.username, "User created");
        Ok(user)
    }

    /// Get a user or fail with `NotFound`.
    ///
    /// # Errors
    ///
    /// `NotFound` or storage failure.
    pub async fn get_user(&self, id: &UserId) -> Result<User, IdentityError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| IdentityError::not_found("user", id.as_str()))
    }

    /// One page of users.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn list_users(&self, page: PageRequest) -> Result<Paginated<User>, IdentityError> {
        self.users.find_all(page).await
    }

    /// Update a user. A supplied role list replaces all assignments.
    ///
    /// # Errors
    ///
    /// Validation failure, `UnknownReference`, `NotFound`, duplicate
    /// username or email, or storage failure.
    pub async fn update_user(&self, id: &UserId, input: UpdateUser) -> Result<User, IdentityError> {
        input.validate()?;
        if let Some(ids) = &input.roles {
            self.ensure_roles(ids).await?;
        }

        self.users
            .update(id, input)
            .await?
            .ok_or_else(|| IdentityError::not_found("user", id.as_str()))
    }

    /// Delete a user and its assignments. Administrators cannot be deleted.
    ///
    /// # Errors
    ///
    /// `NotFound`, `SystemAdminProtected`, or storage failure.
    pub async fn delete_user(&self, id: &UserId) -> Result<(), IdentityError> {
        let user = self.get_user(id).await?;
        if user.has_role(ADMIN_ROLE) {
            tracing::warn!(id = %id, username = %user.username, "Refusing to delete administrator");
            return Err(IdentityError::SystemAdminProtected {
                user_id: id.to_string(),
            });
        }

        if !self.users.delete(id).await? {
            return Err(IdentityError::not_found("user", id.as_str()));
        }
        tracing::info!(id = %id, "User deleted");
        Ok(())
    }
}

impl std::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::Argon2Hasher;
    use crate::store::{IdentityDb, SledPermissionStore, SledRoleStore, SledUserStore};
    use pretty_assertions::assert_eq;

    fn service() -> IdentityService {
        service_with_db().0
    }

    fn service_with_db() -> (IdentityService, IdentityDb) {
        let db = IdentityDb::temporary().unwrap();
        let hasher = Arc::new(Argon2Hasher::with_params(1024, 1, 1).unwrap());
        let svc = IdentityService::new(
            Arc::new(SledUserStore::with_hasher(db.clone(), hasher)),
            Arc::new(SledRoleStore::new(db.clone())),
            Arc::new(SledPermissionStore::new(db.clone())),
        );
        (svc, db)
    }

    async fn seed_admin(svc: &IdentityService) -> User {
        let perm = svc
            .create_permission(CreatePermission::new("user_management", "user", "manage"))
            .await
            .unwrap();
        let admin = svc
            .create_role(CreateRole::new(ADMIN_ROLE).with_permissions(vec![perm.id]))
            .await
            .unwrap();
        svc.create_user(
            CreateUser::new("admin", "admin@example.com", "password123").with_roles(vec![admin.id]),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_admin_scenario() {
        let svc = service();
        let admin = seed_admin(&svc).await;

        assert!(admin.has_permission("anything"));
        assert!(admin.has_role(ADMIN_ROLE));
        assert!(!admin.has_role("USER"));
        assert_eq!(admin.permission_names(), vec!["user_management"]);
    }

    #[tokio::test]
    async fn test_admin_cannot_be_deleted() {
        let svc = service();
        let admin = seed_admin(&svc).await;

        let err = svc.delete_user(&admin.id).await.unwrap_err();
        assert!(matches!(err, IdentityError::SystemAdminProtected { .. }));
        assert_eq!(err.to_string(), "cannot delete system administrator");
        assert!(svc.users().find_by_id(&admin.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let svc = service();
        assert!(matches!(
            svc.delete_user(&UserId::new("ghost")).await,
            Err(IdentityError::NotFound { resource: "user", .. })
        ));
        assert!(matches!(
            svc.delete_role(&RoleId::new("ghost")).await,
            Err(IdentityError::NotFound { resource: "role", .. })
        ));
        assert!(matches!(
            svc.delete_permission(&PermissionId::new("ghost")).await,
            Err(IdentityError::NotFound { resource: "permission", .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_role_leaves_no_user() {
        let svc = service();
        let err = svc
            .create_user(
                CreateUser::new("jdoe", "jdoe@example.com", "password123")
                    .with_roles(vec![RoleId::new("nonexistent-id")]),
            )
            .await
            .unwrap_err();

        match err {
            IdentityError::UnknownReference { missing, .. } => {
                assert_eq!(missing, vec!["nonexistent-id".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(svc.users().find_by_username("jdoe").await.unwrap().is_none());
        assert_eq!(svc.list_users(PageRequest::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_repeated_ids_resolve_once() {
        let svc = service();
        let role = svc.create_role(CreateRole::new("USER")).await.unwrap();

        let user = svc
            .create_user(
                CreateUser::new("jdoe", "jdoe@example.com", "password123")
                    .with_roles(vec![role.id.clone(), role.id.clone()]),
            )
            .await
            .unwrap();
        assert_eq!(user.role_ids(), vec![role.id]);
    }

    #[tokio::test]
    async fn test_unknown_permission_rejects_role_update() {
        let svc = service();
        let perm = svc
            .create_permission(CreatePermission::new("p1", "r", "a"))
            .await
            .unwrap();
        let role = svc
            .create_role(CreateRole::new("R").with_permissions(vec![perm.id.clone()]))
            .await
            .unwrap();

        let err = svc
            .update_role(
                &role.id,
                UpdateRole {
                    permissions: Some(vec![perm.id.clone(), PermissionId::new("ghost")]),
                    ..UpdateRole::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::UnknownReference { resource: "permission", .. }));

        let unchanged = svc.get_role(&role.id).await.unwrap();
        assert_eq!(unchanged.permission_ids(), vec![perm.id]);
        assert_eq!(unchanged.updated_at, role.updated_at);
    }

    #[tokio::test]
    async fn test_full_replace_of_permissions() {
        let svc = service();
        let p1 = svc
            .create_permission(CreatePermission::new("p1", "r", "a"))
            .await
            .unwrap();
        let p2 = svc
            .create_permission(CreatePermission::new("p2", "r", "b"))
            .await
            .unwrap();
        let role = svc
            .create_role(CreateRole::new("R").with_permissions(vec![p1.id, p2.id]))
            .await
            .unwrap();
        assert_eq!(role.permissions.len(), 2);

        svc.update_role(
            &role.id,
            UpdateRole {
                permissions: Some(Vec::new()),
                ..UpdateRole::default()
            },
        )
        .await
        .unwrap();

        assert!(svc.get_role(&role.id).await.unwrap().permissions.is_empty());
    }

    #[tokio::test]
    async fn test_delete_role_with_grants_and_assignments() {
        let (svc, db) = service_with_db();
        let p = svc
            .create_permission(CreatePermission::new("p", "r", "a"))
            .await
            .unwrap();
        let role = svc
            .create_role(CreateRole::new("R").with_permissions(vec![p.id]))
            .await
            .unwrap();
        let user = svc
            .create_user(
                CreateUser::new("jdoe", "jdoe@example.com", "password123").with_roles(vec![role.id.clone()]),
            )
            .await
            .unwrap();

        assert_eq!(IdentityDb::link_count(&db.grants, "role"), 1);
        assert_eq!(IdentityDb::link_count(&db.assignments, "user"), 1);

        svc.delete_role(&role.id).await.unwrap();

        assert_eq!(IdentityDb::link_count(&db.grants, "role"), 0);
        assert_eq!(IdentityDb::link_count(&db.grants, "permission"), 0);
        assert_eq!(IdentityDb::link_count(&db.assignments, "user"), 0);
        assert_eq!(IdentityDb::link_count(&db.assignments, "role"), 0);

        let user = svc.get_user(&user.id).await.unwrap();
        assert!(user.roles.is_empty());
        assert!(user.permissions.is_empty());
        assert!(matches!(
            svc.get_role(&role.id).await,
            Err(IdentityError::NotFound { .. })
        ));

        // Non-admin users can be deleted.
        svc.delete_user(&user.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_user_removes_assignments() {
        let (svc, db) = service_with_db();
        let first = svc.create_role(CreateRole::new("FIRST")).await.unwrap();
        let second = svc.create_role(CreateRole::new("SECOND")).await.unwrap();
        let user = svc
            .create_user(
                CreateUser::new("jdoe", "jdoe@example.com", "password123")
                    .with_roles(vec![first.id.clone(), second.id.clone()]),
            )
            .await
            .unwrap();
        svc.create_user(
            CreateUser::new("other", "other@example.com", "password123").with_roles(vec![first.id.clone()]),
        )
        .await
        .unwrap();
        assert_eq!(IdentityDb::link_count(&db.assignments, "user"), 3);

        svc.delete_user(&user.id).await.unwrap();

        assert_eq!(IdentityDb::link_count(&db.assignments, "user"), 1);
        assert_eq!(IdentityDb::link_count(&db.assignments, "role"), 1);
        assert!(matches!(
            svc.get_user(&user.id).await,
            Err(IdentityError::NotFound { .. })
        ));
        // Roles survive their holders.
        assert!(svc.get_role(&second.id).await.is_ok());
        assert!(svc.users().find_by_username("jdoe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_runs_before_store() {
        let svc = service();
        let err = svc
            .create_user(CreateUser::new("jd", "bad", "short"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Validation(_)));

        let err = svc
            .update_user(&UserId::new("ghost"), UpdateUser::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound { .. }));
    }
}
