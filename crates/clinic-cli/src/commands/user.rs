//! User administration.

use clinic_identity::{CreateUser, IdentityError, IdentityService, UpdateUser, User};

use super::role::display_list;
use super::{Context, generate_password, identity_service, resolve_password, role_ids};
use crate::ui;

/// User actions.
#[derive(Debug)]
pub enum UserAction {
    /// Create a user.
    Create {
        username: String,
        email: String,
        password: Option<String>,
        generate_password: bool,
        roles: Vec<String>,
        first_name: Option<String>,
        last_name: Option<String>,
        clinic_id: Option<String>,
    },
    /// List users.
    List { page: Option<u32>, limit: Option<u32> },
    /// Show one user with roles and effective permissions.
    Show { username: String },
    /// Replace a user's roles.
    SetRoles { username: String, roles: Vec<String> },
    /// Reset a user's password.
    ResetPassword { username: String, password: Option<String> },
    /// Enable a user account.
    Enable { username: String },
    /// Disable a user account.
    Disable { username: String },
    /// Delete a user.
    Delete { username: String, yes: bool },
}

/// Run a user command.
///
/// # Errors
///
/// Returns error if the operation fails.
pub async fn run_user(ctx: &Context, action: UserAction) -> anyhow::Result<()> {
    let db = ctx.open_db()?;
    let identity = identity_service(&db);

    match action {
        UserAction::Create {
            username,
            email,
            password,
            generate_password: generate,
            roles,
            first_name,
            last_name,
            clinic_id,
        } => {
            let ids = role_ids(&identity, &roles).await?;
            let password = resolve_password(password, generate)?;
            let mut input = CreateUser::new(username, email, password).with_roles(ids);
            input.first_name = first_name;
            input.last_name = last_name;
            input.clinic_id = clinic_id;

            let user = identity.create_user(input).await?;
            ui::success(&format!(
                "Created user '{}' with roles: {}",
                user.username,
                display_list(&role_names(&user))
            ));
        }
        UserAction::List { page, limit } => {
            let page = identity.list_users(ctx.page(page, limit)).await?;
            if page.total == 0 {
                ui::info("No users configured.");
                ui::info("Run 'clinic seed' to create an administrator.");
                return Ok(());
            }

            ui::table_header(&[("USERNAME", 20), ("EMAIL", 30), ("ROLES", 24), ("ACTIVE", 8), ("CREATED", 20)]);
            for user in &page.items {
                let roles = display_list(&role_names(user));
                let active = if user.is_active { "yes" } else { "no" };
                let created = user.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
                ui::table_row(&[
                    (user.username.as_str(), 20),
                    (user.email.as_str(), 30),
                    (roles.as_str(), 24),
                    (active, 8),
                    (created.as_str(), 20),
                ]);
            }
            ui::page_footer(page.page, page.total_pages(), page.total);
        }
        UserAction::Show { username } => {
            let user = find(&identity, &username).await?;
            print_user(&user);
        }
        UserAction::SetRoles { username, roles } => {
            let user = find(&identity, &username).await?;
            let ids = role_ids(&identity, &roles).await?;
            let user = identity
                .update_user(
                    &user.id,
                    UpdateUser {
                        roles: Some(ids),
                        ..UpdateUser::default()
                    },
                )
                .await?;
            ui::success(&format!(
                "User '{}' now has roles: {}",
                user.username,
                display_list(&role_names(&user))
            ));
        }
        UserAction::ResetPassword { username, password } => {
            let user = find(&identity, &username).await?;
            let generated = password.is_none();
            let password = password.unwrap_or_else(|| generate_password(16));
            identity
                .update_user(
                    &user.id,
                    UpdateUser {
                        password: Some(password.clone()),
                        ..UpdateUser::default()
                    },
                )
                .await?;
            ui::success(&format!("Password reset for user '{username}'"));
            if generated {
                ui::success(&format!("New password: {password}"));
            }
        }
        UserAction::Enable { username } => set_active(&identity, &username, true).await?,
        UserAction::Disable { username } => set_active(&identity, &username, false).await?,
        UserAction::Delete { username, yes } => {
            let user = find(&identity, &username).await?;
            if !yes && !ui::prompts::confirm(&format!("Delete user '{username}'?"))? {
                ui::info("Aborted.");
                return Ok(());
            }
            match identity.delete_user(&user.id).await {
                Ok(()) => ui::success(&format!("Deleted user '{username}'")),
                Err(IdentityError::SystemAdminProtected { .. }) => {
                    anyhow::bail!("User '{username}' is a system administrator and cannot be deleted");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

async fn find(identity: &IdentityService, username: &str) -> anyhow::Result<User> {
    identity
        .users()
        .find_by_username(username)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found: {username}"))
}

async fn set_active(identity: &IdentityService, username: &str, active: bool) -> anyhow::Result<()> {
    let user = find(identity, username).await?;
    identity
        .update_user(
            &user.id,
            UpdateUser {
                is_active: Some(active),
                ..UpdateUser::default()
            },
        )
        .await?;

    let status = if active { "enabled" } else { "disabled" };
    ui::success(&format!("User '{username}' {status}"));
    Ok(())
}

fn role_names(user: &User) -> Vec<&str> {
    user.roles.iter().map(|r| r.name.as_str()).collect()
}

/// Print a user's profile and effective permissions.
pub fn print_user(user: &User) {
    ui::header(&user.display_name());
    ui::kv("id", user.id.as_str());
    ui::kv("username", &user.username);
    ui::kv("email", &user.email);
    ui::kv("clinic", user.clinic_id.as_deref().unwrap_or("-"));
    ui::kv("active", if user.is_active { "yes" } else { "no" });
    ui::kv("roles", &display_list(&role_names(user)));
    let permissions: Vec<_> = user.permissions.iter().map(|p| p.name.as_str()).collect();
    ui::kv("permissions", &display_list(&permissions));
    let last_login = user
        .last_login_at
        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
    ui::kv("last login", &last_login);
}
