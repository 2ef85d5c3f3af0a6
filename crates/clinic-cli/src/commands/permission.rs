//! Permission administration.

use clinic_identity::{CreatePermission, IdentityService, PermissionId, UpdatePermission};

use super::{Context, identity_service};
use crate::ui;

/// Permission actions.
#[derive(Debug)]
pub enum PermissionAction {
    /// Create a permission.
    Create {
        name: String,
        resource: String,
        action: String,
        description: Option<String>,
    },
    /// Change a permission.
    Update {
        name: String,
        rename: Option<String>,
        resource: Option<String>,
        action: Option<String>,
        description: Option<String>,
    },
    /// List permissions.
    List { page: Option<u32>, limit: Option<u32> },
    /// Delete a permission and its grants.
    Delete { name: String },
}

/// Run a permission command.
///
/// # Errors
///
/// Returns error if the operation fails.
pub async fn run_permission(ctx: &Context, action: PermissionAction) -> anyhow::Result<()> {
    let db = ctx.open_db()?;
    let identity = identity_service(&db);

    match action {
        PermissionAction::Create {
            name,
            resource,
            action,
            description,
        } => {
            let mut input = CreatePermission::new(name, resource, action);
            input.description = description;
            let permission = identity.create_permission(input).await?;
            ui::success(&format!(
                "Created permission '{}' ({} {})",
                permission.name, permission.action, permission.resource
            ));
        }
        PermissionAction::Update {
            name,
            rename,
            resource,
            action,
            description,
        } => {
            let id = find(&identity, &name).await?;
            let permission = identity
                .update_permission(
                    &id,
                    UpdatePermission {
                        name: rename,
                        description,
                        resource,
                        action,
                    },
                )
                .await?;
            ui::success(&format!("Updated permission '{}'", permission.name));
        }
        PermissionAction::List { page, limit } => {
            let page = identity.list_permissions(ctx.page(page, limit)).await?;
            if page.total == 0 {
                ui::info("No permissions defined. Run 'clinic seed' to create the defaults.");
                return Ok(());
            }

            ui::table_header(&[("NAME", 28), ("RESOURCE", 16), ("ACTION", 12), ("CREATED", 20)]);
            for p in &page.items {
                let created = p.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
                ui::table_row(&[
                    (p.name.as_str(), 28),
                    (p.resource.as_str(), 16),
                    (p.action.as_str(), 12),
                    (created.as_str(), 20),
                ]);
            }
            ui::page_footer(page.page, page.total_pages(), page.total);
        }
        PermissionAction::Delete { name } => {
            let id = find(&identity, &name).await?;
            identity.delete_permission(&id).await?;
            ui::success(&format!("Deleted permission '{name}'"));
        }
    }

    Ok(())
}

async fn find(identity: &IdentityService, name: &str) -> anyhow::Result<PermissionId> {
    identity
        .permissions()
        .find_by_name(name)
        .await?
        .map(|p| p.id)
        .ok_or_else(|| anyhow::anyhow!("Permission not found: {name}"))
}
