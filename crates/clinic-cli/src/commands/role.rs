//! Role administration.

use clinic_identity::{CreateRole, IdentityService, RoleId, UpdateRole};

use super::{Context, identity_service, permission_ids};
use crate::ui;

/// Role actions.
#[derive(Debug)]
pub enum RoleAction {
    /// Create a role.
    Create {
        name: String,
        description: Option<String>,
        permissions: Vec<String>,
    },
    /// Replace the permissions a role grants.
    Grant { name: String, permissions: Vec<String> },
    /// Rename or describe a role.
    Update {
        name: String,
        rename: Option<String>,
        description: Option<String>,
    },
    /// Show one role.
    Show { name: String },
    /// List roles.
    List { page: Option<u32>, limit: Option<u32> },
    /// Delete a role with its grants and assignments.
    Delete { name: String },
}

/// Run a role command.
///
/// # Errors
///
/// Returns error if the operation fails.
pub async fn run_role(ctx: &Context, action: RoleAction) -> anyhow::Result<()> {
    let db = ctx.open_db()?;
    let identity = identity_service(&db);

    match action {
        RoleAction::Create {
            name,
            description,
            permissions,
        } => {
            let ids = permission_ids(&identity, &permissions).await?;
            let mut input = CreateRole::new(name).with_permissions(ids);
            input.description = description;
            let role = identity.create_role(input).await?;
            ui::success(&format!(
                "Created role '{}' granting {} permission(s)",
                role.name,
                role.permissions.len()
            ));
        }
        RoleAction::Grant { name, permissions } => {
            let id = find(&identity, &name).await?;
            let ids = permission_ids(&identity, &permissions).await?;
            let role = identity
                .update_role(
                    &id,
                    UpdateRole {
                        permissions: Some(ids),
                        ..UpdateRole::default()
                    },
                )
                .await?;
            let names: Vec<_> = role.permissions.iter().map(|p| p.name.as_str()).collect();
            ui::success(&format!("Role '{}' now grants: {}", role.name, display_list(&names)));
        }
        RoleAction::Update {
            name,
            rename,
            description,
        } => {
            let id = find(&identity, &name).await?;
            let role = identity
                .update_role(
                    &id,
                    UpdateRole {
                        name: rename,
                        description,
                        permissions: None,
                    },
                )
                .await?;
            ui::success(&format!("Updated role '{}'", role.name));
        }
        RoleAction::Show { name } => {
            let id = find(&identity, &name).await?;
            let role = identity.get_role(&id).await?;
            ui::header(&role.name);
            ui::kv("id", role.id.as_str());
            ui::kv("description", role.description.as_deref().unwrap_or("-"));
            let names: Vec<_> = role.permissions.iter().map(|p| p.name.as_str()).collect();
            ui::kv("permissions", &display_list(&names));
            ui::kv("updated", &role.updated_at.to_rfc3339());
        }
        RoleAction::List { page, limit } => {
            let page = identity.list_roles(ctx.page(page, limit)).await?;
            if page.total == 0 {
                ui::info("No roles defined. Run 'clinic seed' to create the defaults.");
                return Ok(());
            }

            ui::table_header(&[("NAME", 20), ("PERMISSIONS", 40), ("CREATED", 20)]);
            for role in &page.items {
                let names: Vec<_> = role.permissions.iter().map(|p| p.name.as_str()).collect();
                let names = display_list(&names);
                let created = role.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
                ui::table_row(&[
                    (role.name.as_str(), 20),
                    (names.as_str(), 40),
                    (created.as_str(), 20),
                ]);
            }
            ui::page_footer(page.page, page.total_pages(), page.total);
        }
        RoleAction::Delete { name } => {
            let id = find(&identity, &name).await?;
            identity.delete_role(&id).await?;
            ui::success(&format!("Deleted role '{name}'"));
        }
    }

    Ok(())
}

async fn find(identity: &IdentityService, name: &str) -> anyhow::Result<RoleId> {
    identity
        .roles()
        .find_by_name(name)
        .await?
        .map(|r| r.id)
        .ok_or_else(|| anyhow::anyhow!("Role not found: {name}"))
}

/// Comma-joined list, `-` when empty.
pub fn display_list(items: &[&str]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
