//! Seed the default administrator.

use clinic_identity::{
    ADMIN_ROLE, CreatePermission, CreateRole, CreateUser, IdentityService, UpdateRole,
};

use super::{Context, identity_service, resolve_password};
use crate::ui;

/// Permission every administrator role grants.
pub const USER_MANAGEMENT: &str = "user_management";

/// Default administrator username.
pub const ADMIN_USERNAME: &str = "admin";

/// Arguments for `clinic seed`.
#[derive(Debug, Default)]
pub struct SeedArgs {
    /// Administrator password.
    pub password: Option<String>,
    /// Generate the administrator password.
    pub generate_password: bool,
    /// Administrator email.
    pub email: Option<String>,
}

/// What a seed run created. Already-present rows are left as they are.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// The permission was created.
    pub permission: bool,
    /// The role was created.
    pub role: bool,
    /// The role had to be granted the permission.
    pub granted: bool,
    /// The user was created.
    pub user: bool,
}

/// Run `clinic seed`.
///
/// # Errors
///
/// Returns error if the operation fails.
pub async fn run_seed(ctx: &Context, args: SeedArgs) -> anyhow::Result<()> {
    let db = ctx.open_db()?;
    let identity = identity_service(&db);

    let needs_user = identity.users().find_by_username(ADMIN_USERNAME).await?.is_none();
    let password = if needs_user {
        Some(resolve_password(args.password, args.generate_password)?)
    } else {
        None
    };
    let email = args
        .email
        .unwrap_or_else(|| format!("{ADMIN_USERNAME}@localhost.localdomain"));

    let report = seed(&identity, password.as_deref(), &email).await?;
    db.flush().await?;

    let line = |created: bool, what: &str| {
        if created {
            ui::success(&format!("Created {what}"));
        } else {
            ui::info(&format!("{what} already present"));
        }
    };
    line(report.permission, &format!("permission '{USER_MANAGEMENT}'"));
    line(report.role, &format!("role '{ADMIN_ROLE}'"));
    if report.granted {
        ui::success(&format!("Granted '{USER_MANAGEMENT}' to '{ADMIN_ROLE}'"));
    }
    line(report.user, &format!("user '{ADMIN_USERNAME}'"));
    Ok(())
}

/// Find or create the administrator permission, role and user.
///
/// `password` is only used when the user has to be created.
///
/// # Errors
///
/// Returns error if a lookup or write fails, or if the user is missing
/// and no password was given.
pub async fn seed(
    identity: &IdentityService,
    password: Option<&str>,
    email: &str,
) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    let permission = match identity.permissions().find_by_name(USER_MANAGEMENT).await? {
        Some(p) => p,
        None => {
            report.permission = true;
            let mut input = CreatePermission::new(USER_MANAGEMENT, "user", "manage");
            input.description = Some("Manage users, roles and permissions".to_string());
            identity.create_permission(input).await?
        }
    };

    let role = match identity.roles().find_by_name(ADMIN_ROLE).await? {
        Some(role) if role.permissions.iter().any(|p| p.id == permission.id) => role,
        Some(role) => {
            report.granted = true;
            let mut ids = role.permission_ids();
            ids.push(permission.id.clone());
            identity
                .update_role(
                    &role.id,
                    UpdateRole {
                        permissions: Some(ids),
                        ..UpdateRole::default()
                    },
                )
                .await?
        }
        None => {
            report.role = true;
            report.granted = true;
            let mut input = CreateRole::new(ADMIN_ROLE).with_permissions(vec![permission.id.clone()]);
            input.description = Some("System administrator".to_string());
            identity.create_role(input).await?
        }
    };

    if identity.users().find_by_username(ADMIN_USERNAME).await?.is_none() {
        let password =
            password.ok_or_else(|| anyhow::anyhow!("A password is required to create '{ADMIN_USERNAME}'"))?;
        identity
            .create_user(CreateUser::new(ADMIN_USERNAME, email, password).with_roles(vec![role.id]))
            .await?;
        report.user = true;
    }

    tracing::info!(?report, "Seed complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use clinic_identity::{
        Argon2Hasher, IdentityDb, SledPermissionStore, SledRoleStore, SledUserStore,
    };
    use pretty_assertions::assert_eq;

    fn service() -> IdentityService {
        let db = IdentityDb::temporary().unwrap();
        let hasher = Arc::new(Argon2Hasher::with_params(1024, 1, 1).unwrap());
        IdentityService::new(
            Arc::new(SledUserStore::with_hasher(db.clone(), hasher)),
            Arc::new(SledRoleStore::new(db.clone())),
            Arc::new(SledPermissionStore::new(db)),
        )
    }

    #[tokio::test]
    async fn test_seed_creates_admin() {
        let identity = service();
        let report = seed(&identity, Some("password123"), "admin@example.com")
            .await
            .unwrap();
        assert_eq!(
            report,
            SeedReport {
                permission: true,
                role: true,
                granted: true,
                user: true,
            }
        );

        let admin = identity
            .users()
            .find_by_username(ADMIN_USERNAME)
            .await
            .unwrap()
            .unwrap();
        assert!(admin.has_role(ADMIN_ROLE));
        assert!(admin.has_permission(USER_MANAGEMENT));
        assert_eq!(admin.permission_names(), vec![USER_MANAGEMENT.to_string()]);
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let identity = service();
        seed(&identity, Some("password123"), "admin@example.com")
            .await
            .unwrap();

        let report = seed(&identity, None, "admin@example.com").await.unwrap();
        assert_eq!(report, SeedReport::default());
        assert_eq!(identity.list_roles(clinic_core::PageRequest::new(1, 10)).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_seed_grants_existing_role() {
        let identity = service();
        identity.create_role(CreateRole::new(ADMIN_ROLE)).await.unwrap();

        let report = seed(&identity, Some("password123"), "admin@example.com")
            .await
            .unwrap();
        assert!(!report.role);
        assert!(report.granted);

        let role = identity.roles().find_by_name(ADMIN_ROLE).await.unwrap().unwrap();
        assert_eq!(role.permissions.len(), 1);
        assert_eq!(role.permissions[0].name, USER_MANAGEMENT);
    }

    #[tokio::test]
    async fn test_seed_without_password_fails_before_user() {
        let identity = service();
        assert!(seed(&identity, None, "admin@example.com").await.is_err());
        assert!(
            identity
                .users()
                .find_by_username(ADMIN_USERNAME)
                .await
                .unwrap()
                .is_none()
        );
    }
}
