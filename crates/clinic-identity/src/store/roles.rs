//! Sled-backed role store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_core::{PageRequest, Paginated};
use serde::{Deserialize, Serialize};
use sled::Transactional;

use super::RoleStore;
use super::db::{
    IdentityDb, PERMISSION, ROLE, TxResult, USER, Unique, claim, get_json, release, rename,
    replace_links, require_rows, scan_json, tx_get, tx_put, unlink_all,
};
use crate::error::IdentityError;
use crate::models::{CreateRole, PermissionId, Role, RoleId, UpdateRole, next_timestamp};

/// Stored role row. Grants live in the `grants` tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleRecord {
    pub(crate) id: RoleId,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

fn link_ids(ids: &[PermissionId]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

/// Role store over [`IdentityDb`].
#[derive(Debug, Clone)]
pub struct SledRoleStore {
    db: IdentityDb,
}

impl SledRoleStore {
    /// Create a store over a shared database.
    #[must_use]
    pub const fn new(db: IdentityDb) -> Self {
        Self { db }
    }

    fn resolve(&self, record: RoleRecord) -> Result<Role, IdentityError> {
        let permissions = self.db.role_permissions(&record.id)?;
        Ok(Role {
            id: record.id,
            name: record.name,
            description: record.description,
            permissions,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Role>, IdentityError> {
        get_json::<RoleRecord>(&self.db.roles, id)?
            .map(|r| self.resolve(r))
            .transpose()
    }
}

#[async_trait]
impl RoleStore for SledRoleStore {
    async fn create(&self, input: CreateRole) -> Result<Role, IdentityError> {
        let now = Utc::now();
        let record = RoleRecord {
            id: RoleId::generate(),
            name: input.name,
            description: input.description,
            created_at: now,
            updated_at: now,
        };
        let grants = link_ids(input.permissions.as_deref().unwrap_or_default());

        (
            &self.db.roles,
            &self.db.permissions,
            &self.db.grants,
            &self.db.indexes,
        )
            .transaction(|(roles, permissions, grant_tree, indexes)| -> TxResult<()> {
                let id = record.id.as_str();
                require_rows(permissions, &grants, PERMISSION, "permissions")?;
                claim(indexes, Unique::RoleName, &record.name, id)?;
                tx_put(roles, id, &record)?;
                replace_links(grant_tree, ROLE, id, PERMISSION, &grants)
            })?;
        self.db.flush().await?;

        tracing::debug!(id = %record.id, name = %record.name, grants = grants.len(), "Role created");
        self.resolve(record)
    }

    async fn find_by_id(&self, id: &RoleId) -> Result<Option<Role>, IdentityError> {
        self.get(id.as_str())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>, IdentityError> {
        match self.db.lookup(Unique::RoleName, name)? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    async fn find_all(&self, page: PageRequest) -> Result<Paginated<Role>, IdentityError> {
        let mut rows: Vec<RoleRecord> = scan_json(&self.db.roles)?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let page = page.apply(rows);
        let mut items = Vec::with_capacity(page.items.len());
        for record in page.items {
            items.push(self.resolve(record)?);
        }

        Ok(Paginated {
            items,
            total: page.total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn update(&self, id: &RoleId, input: UpdateRole) -> Result<Option<Role>, IdentityError> {
        let grants = input.permissions.as_deref().map(link_ids);

        let updated = (
            &self.db.roles,
            &self.db.permissions,
            &self.db.grants,
            &self.db.indexes,
        )
            .transaction(|(roles, permissions, grant_tree, indexes)| -> TxResult<Option<RoleRecord>> {
                let Some(mut record) = tx_get::<RoleRecord>(roles, id.as_str())? else {
                    return Ok(None);
                };

                if let Some(name) = &input.name {
                    rename(indexes, Unique::RoleName, &record.name, name, id.as_str())?;
                    record.name.clone_from(name);
                }
                if let Some(description) = &input.description {
                    record.description = Some(description.clone());
                }
                if let Some(grants) = &grants {
                    require_rows(permissions, grants, PERMISSION, "permissions")?;
                    replace_links(grant_tree, ROLE, id.as_str(), PERMISSION, grants)?;
                }
                record.updated_at = next_timestamp(record.updated_at);

                tx_put(roles, id.as_str(), &record)?;
                Ok(Some(record))
            })?;

        match updated {
            Some(record) => {
                self.db.flush().await?;
                self.resolve(record).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &RoleId) -> Result<bool, IdentityError> {
        let deleted = (
            &self.db.roles,
            &self.db.grants,
            &self.db.assignments,
            &self.db.indexes,
        )
            .transaction(|(roles, grants, assignments, indexes)| -> TxResult<bool> {
                let Some(record) = tx_get::<RoleRecord>(roles, id.as_str())? else {
                    return Ok(false);
                };

                unlink_all(grants, ROLE, id.as_str(), PERMISSION)?;
                unlink_all(assignments, ROLE, id.as_str(), USER)?;
                release(indexes, Unique::RoleName, &record.name, id.as_str())?;
                roles.remove(id.as_str().as_bytes())?;
                Ok(true)
            })?;

        if deleted {
            self.db.flush().await?;
            tracing::debug!(id = %id, "Role deleted");
        }
        Ok(deleted)
    }

    async fn find_by_ids(&self, ids: &[RoleId]) -> Result<Vec<Role>, IdentityError> {
        let mut found: Vec<Role> = Vec::with_capacity(ids.len());
        for id in ids {
            if found.iter().any(|r| &r.id == id) {
                continue;
            }
            if let Some(role) = self.get(id.as_str())? {
                found.push(role);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreatePermission;
    use crate::store::{PermissionStore, SledPermissionStore};
    use pretty_assertions::assert_eq;

    struct Fixture {
        db: IdentityDb,
        roles: SledRoleStore,
        permissions: SledPermissionStore,
    }

    fn fixture() -> Fixture {
        let db = IdentityDb::temporary().unwrap();
        Fixture {
            roles: SledRoleStore::new(db.clone()),
            permissions: SledPermissionStore::new(db.clone()),
            db,
        }
    }

    async fn permission(f: &Fixture, name: &str) -> PermissionId {
        f.permissions
            .create(CreatePermission::new(name, "device", name))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_with_permissions() {
        let f = fixture();
        let read = permission(&f, "device_read").await;
        let write = permission(&f, "device_write").await;

        let role = f
            .roles
            .create(CreateRole::new("OPERATOR").with_permissions(vec![write.clone(), read.clone()]))
            .await
            .unwrap();

        let names: Vec<_> = role.permissions.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["device_read", "device_write"]);
        assert_eq!(f.roles.find_by_name("OPERATOR").await.unwrap(), Some(role.clone()));

        let bare = f.roles.create(CreateRole::new("EMPTY")).await.unwrap();
        assert!(bare.permissions.is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_grants() {
        let f = fixture();
        let a = permission(&f, "a").await;
        let b = permission(&f, "b").await;
        let c = permission(&f, "c").await;

        let role = f
            .roles
            .create(CreateRole::new("R").with_permissions(vec![a.clone(), b.clone()]))
            .await
            .unwrap();

        let renamed = f
            .roles
            .update(
                &role.id,
                UpdateRole {
                    description: Some("renamed only".to_string()),
                    ..UpdateRole::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.permission_ids(), vec![a.clone(), b.clone()]);
        assert!(renamed.updated_at > role.updated_at);

        let replaced = f
            .roles
            .update(
                &role.id,
                UpdateRole {
                    permissions: Some(vec![b.clone(), c.clone()]),
                    ..UpdateRole::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.permission_ids(), vec![b.clone(), c.clone()]);
        assert_eq!(IdentityDb::link_count(&f.db.grants, ROLE), 2);

        let cleared = f
            .roles
            .update(
                &role.id,
                UpdateRole {
                    permissions: Some(Vec::new()),
                    ..UpdateRole::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.permissions.is_empty());
        assert_eq!(IdentityDb::link_count(&f.db.grants, PERMISSION), 0);
    }

    #[tokio::test]
    async fn test_empty_update_only_touches_timestamp() {
        let f = fixture();
        let a = permission(&f, "a").await;
        let mut input = CreateRole::new("R").with_permissions(vec![a]);
        input.description = Some("reviewers".to_string());
        let role = f.roles.create(input).await.unwrap();

        let touched = f
            .roles
            .update(&role.id, UpdateRole::default())
            .await
            .unwrap()
            .unwrap();
        assert!(touched.updated_at > role.updated_at);
        assert_eq!(
            Role {
                updated_at: role.updated_at,
                ..touched.clone()
            },
            role
        );
        assert_eq!(f.roles.find_by_id(&role.id).await.unwrap(), Some(touched));
        assert_eq!(IdentityDb::link_count(&f.db.grants, ROLE), 1);
    }

    #[tokio::test]
    async fn test_unknown_permission_aborts_write() {
        let f = fixture();
        let a = permission(&f, "a").await;
        let ghost = PermissionId::new("ghost");

        let err = f
            .roles
            .create(CreateRole::new("R").with_permissions(vec![a.clone(), ghost.clone()]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IdentityError::UnknownReference { resource: PERMISSION, ref missing, .. }
                if missing == &vec!["ghost".to_string()]
        ));
        assert_eq!(f.db.roles.len(), 0);
        assert_eq!(IdentityDb::link_count(&f.db.grants, PERMISSION), 0);
        assert!(f.roles.find_by_name("R").await.unwrap().is_none());

        let role = f
            .roles
            .create(CreateRole::new("R").with_permissions(vec![a.clone()]))
            .await
            .unwrap();
        let err = f
            .roles
            .update(
                &role.id,
                UpdateRole {
                    name: Some("R2".to_string()),
                    permissions: Some(vec![ghost]),
                    ..UpdateRole::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::UnknownReference { .. }));
        assert_eq!(f.roles.find_by_id(&role.id).await.unwrap(), Some(role));
        assert!(f.roles.find_by_name("R2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleted_permission_drops_from_roles() {
        let f = fixture();
        let a = permission(&f, "a").await;
        let role = f
            .roles
            .create(CreateRole::new("R").with_permissions(vec![a.clone()]))
            .await
            .unwrap();

        assert!(f.permissions.delete(&a).await.unwrap());
        let role = f.roles.find_by_id(&role.id).await.unwrap().unwrap();
        assert!(role.permissions.is_empty());
        assert_eq!(IdentityDb::link_count(&f.db.grants, ROLE), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_grants() {
        let f = fixture();
        let a = permission(&f, "a").await;
        let role = f
            .roles
            .create(CreateRole::new("R").with_permissions(vec![a.clone()]))
            .await
            .unwrap();

        assert!(f.roles.delete(&role.id).await.unwrap());
        assert_eq!(IdentityDb::link_count(&f.db.grants, ROLE), 0);
        assert_eq!(IdentityDb::link_count(&f.db.grants, PERMISSION), 0);
        assert!(f.permissions.find_by_id(&a).await.unwrap().is_some());
        assert!(!f.roles.delete(&role.id).await.unwrap());

        // Name is free again.
        f.roles.create(CreateRole::new("R")).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_name() {
        let f = fixture();
        f.roles.create(CreateRole::new("ADMIN")).await.unwrap();
        let err = f.roles.create(CreateRole::new("ADMIN")).await.unwrap_err();
        assert!(matches!(err, IdentityError::Duplicate { resource: "role", .. }));
    }

    #[tokio::test]
    async fn test_find_all_and_by_ids() {
        let f = fixture();
        let first = f.roles.create(CreateRole::new("FIRST")).await.unwrap();
        let second = f.roles.create(CreateRole::new("SECOND")).await.unwrap();

        let page = f.roles.find_all(PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, second.id);

        assert!(f.roles.find_by_ids(&[]).await.unwrap().is_empty());
        let found = f
            .roles
            .find_by_ids(&[first.id.clone(), RoleId::new("ghost")])
            .await
            .unwrap();
        assert_eq!(found, vec![first]);
    }
}
