//! Sled-backed permission store.

use async_trait::async_trait;
use chrono::Utc;
use clinic_core::{PageRequest, Paginated};
use sled::Transactional;

use super::PermissionStore;
use super::db::{
    IdentityDb, PERMISSION, ROLE, TxResult, Unique, claim, get_json, release, rename, scan_json,
    tx_get, tx_put, unlink_all,
};
use crate::error::IdentityError;
use crate::models::{CreatePermission, Permission, PermissionId, UpdatePermission, next_timestamp};

/// Permission store over [`IdentityDb`].
#[derive(Debug, Clone)]
pub struct SledPermissionStore {
    db: IdentityDb,
}

impl SledPermissionStore {
    /// Create a store over a shared database.
    #[must_use]
    pub const fn new(db: IdentityDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PermissionStore for SledPermissionStore {
    async fn create(&self, input: CreatePermission) -> Result<Permission, IdentityError> {
        let now = Utc::now();
        let permission = Permission {
            id: PermissionId::generate(),
            name: input.name,
            description: input.description,
            resource: input.resource,
            action: input.action,
            created_at: now,
            updated_at: now,
        };

        (&self.db.permissions, &self.db.indexes).transaction(|(permissions, indexes)| -> TxResult<()> {
            let id = permission.id.as_str();
            claim(indexes, Unique::PermissionName, &permission.name, id)?;
            tx_put(permissions, id, &permission)
        })?;
        self.db.flush().await?;

        tracing::debug!(id = %permission.id, name = %permission.name, "Permission created");
        Ok(permission)
    }

    async fn find_by_id(&self, id: &PermissionId) -> Result<Option<Permission>, IdentityError> {
        get_json(&self.db.permissions, id.as_str())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Permission>, IdentityError> {
        match self.db.lookup(Unique::PermissionName, name)? {
            Some(id) => get_json(&self.db.permissions, &id),
            None => Ok(None),
        }
    }

    async fn find_by_resource_and_action(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Option<Permission>, IdentityError> {
        let rows: Vec<Permission> = scan_json(&self.db.permissions)?;
        Ok(rows
            .into_iter()
            .filter(|p| p.resource == resource && p.action == action)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))))
    }

    async fn find_all(&self, page: PageRequest) -> Result<Paginated<Permission>, IdentityError> {
        let mut rows: Vec<Permission> = scan_json(&self.db.permissions)?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(page.apply(rows))
    }

    async fn update(
        &self,
        id: &PermissionId,
        input: UpdatePermission,
    ) -> Result<Option<Permission>, IdentityError> {
        let updated = (&self.db.permissions, &self.db.indexes).transaction(
            |(permissions, indexes)| -> TxResult<Option<Permission>> {
                let Some(mut permission) = tx_get::<Permission>(permissions, id.as_str())? else {
                    return Ok(None);
                };

                if let Some(name) = &input.name {
                    rename(indexes, Unique::PermissionName, &permission.name, name, id.as_str())?;
                    permission.name.clone_from(name);
                }
                if let Some(description) = &input.description {
                    permission.description = Some(description.clone());
                }
                if let Some(resource) = &input.resource {
                    permission.resource.clone_from(resource);
                }
                if let Some(action) = &input.action {
                    permission.action.clone_from(action);
                }
                permission.updated_at = next_timestamp(permission.updated_at);

                tx_put(permissions, id.as_str(), &permission)?;
                Ok(Some(permission))
            },
        )?;

        if updated.is_some() {
            self.db.flush().await?;
        }
        Ok(updated)
    }

    async fn delete(&self, id: &PermissionId) -> Result<bool, IdentityError> {
        let deleted = (&self.db.permissions, &self.db.grants, &self.db.indexes).transaction(
            |(permissions, grants, indexes)| -> TxResult<bool> {
                let Some(permission) = tx_get::<Permission>(permissions, id.as_str())? else {
                    return Ok(false);
                };

                unlink_all(grants, PERMISSION, id.as_str(), ROLE)?;
                release(indexes, Unique::PermissionName, &permission.name, id.as_str())?;
                permissions.remove(id.as_str().as_bytes())?;
                Ok(true)
            },
        )?;

        if deleted {
            self.db.flush().await?;
            tracing::debug!(id = %id, "Permission deleted");
        }
        Ok(deleted)
    }

    async fn find_by_ids(&self, ids: &[PermissionId]) -> Result<Vec<Permission>, IdentityError> {
        let mut found: Vec<Permission> = Vec::with_capacity(ids.len());
        for id in ids {
            if found.iter().any(|p| &p.id == id) {
                continue;
            }
            if let Some(p) = get_json(&self.db.permissions, id.as_str())? {
                found.push(p);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> SledPermissionStore {
        SledPermissionStore::new(IdentityDb::temporary().unwrap())
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = store();
        let created = store
            .create(CreatePermission::new("user_management", "user", "manage"))
            .await
            .unwrap();

        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(store.find_by_id(&created.id).await.unwrap(), Some(created.clone()));
        assert_eq!(
            store.find_by_name("user_management").await.unwrap(),
            Some(created.clone())
        );
        assert_eq!(
            store.find_by_resource_and_action("user", "manage").await.unwrap(),
            Some(created)
        );
        assert_eq!(store.find_by_name("nope").await.unwrap(), None);
        assert_eq!(
            store.find_by_resource_and_action("user", "read").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_duplicate_name() {
        let store = store();
        store
            .create(CreatePermission::new("device_read", "device", "read"))
            .await
            .unwrap();

        let err = store
            .create(CreatePermission::new("device_read", "device", "list"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Duplicate { resource: "permission", .. }));
    }

    #[tokio::test]
    async fn test_update() {
        let store = store();
        let a = store
            .create(CreatePermission::new("a", "device", "read"))
            .await
            .unwrap();
        store
            .create(CreatePermission::new("b", "device", "write"))
            .await
            .unwrap();

        let empty = store
            .update(&a.id, UpdatePermission::default())
            .await
            .unwrap()
            .unwrap();
        assert!(empty.updated_at > a.updated_at);
        assert_eq!(
            Permission {
                updated_at: a.updated_at,
                ..empty.clone()
            },
            a
        );
        assert_eq!(store.find_by_id(&a.id).await.unwrap(), Some(empty.clone()));

        let renamed = store
            .update(
                &a.id,
                UpdatePermission {
                    name: Some("a2".to_string()),
                    action: Some("list".to_string()),
                    ..UpdatePermission::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "a2");
        assert_eq!(renamed.action, "list");
        assert_eq!(store.find_by_name("a").await.unwrap(), None);
        assert!(store.find_by_name("a2").await.unwrap().is_some());

        let clash = store
            .update(
                &a.id,
                UpdatePermission {
                    name: Some("b".to_string()),
                    ..UpdatePermission::default()
                },
            )
            .await;
        assert!(matches!(clash, Err(IdentityError::Duplicate { .. })));

        let missing = store
            .update(&PermissionId::new("missing"), UpdatePermission::default())
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_find_all_newest_first() {
        let store = store();
        for name in ["one", "two", "three"] {
            store
                .create(CreatePermission::new(name, "r", name))
                .await
                .unwrap();
        }

        let page = store.find_all(PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(page.total, 3);
        let names: Vec<_> = page.items.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["three", "two"]);

        let page = store.find_all(PageRequest::new(2, 2)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "one");
    }

    #[tokio::test]
    async fn test_find_by_ids() {
        let store = store();
        let a = store
            .create(CreatePermission::new("a", "r", "x"))
            .await
            .unwrap();

        assert!(store.find_by_ids(&[]).await.unwrap().is_empty());

        let found = store
            .find_by_ids(&[a.id.clone(), PermissionId::new("ghost"), a.id.clone()])
            .await
            .unwrap();
        assert_eq!(found, vec![a]);
    }

    #[tokio::test]
    async fn test_delete_releases_name() {
        let store = store();
        let a = store
            .create(CreatePermission::new("a", "r", "x"))
            .await
            .unwrap();

        assert!(store.delete(&a.id).await.unwrap());
        assert!(!store.delete(&a.id).await.unwrap());
        assert_eq!(store.find_by_id(&a.id).await.unwrap(), None);

        store
            .create(CreatePermission::new("a", "r", "x"))
            .await
            .unwrap();
    }
}
