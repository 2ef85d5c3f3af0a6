//! Shared sled database for the identity stores.
//!
//! Trees:
//! - `users`, `roles`, `permissions`: rows keyed by id
//! - `grants`: `role:{id}` lists permission ids, `permission:{id}` lists role ids
//! - `assignments`: `user:{id}` lists role ids, `role:{id}` lists user ids
//! - `indexes`: unique values (`username:`, `email:`, `role_name:`,
//!   `permission_name:`) mapped to the owning id
//!
//! Both directions of a join are written in the same transaction, so each
//! side can be read without a scan.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::Tree;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};

use crate::error::IdentityError;
use crate::models::{Permission, PermissionRef, RoleId, RoleRef};

use super::roles::RoleRecord;

/// Result type inside a sled transaction.
pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<IdentityError>>;

/// Join side prefixes.
pub(crate) const ROLE: &str = "role";
pub(crate) const PERMISSION: &str = "permission";
pub(crate) const USER: &str = "user";

/// A unique field backed by the `indexes` tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unique {
    Username,
    Email,
    RoleName,
    PermissionName,
}

impl Unique {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
            Self::RoleName => "role_name",
            Self::PermissionName => "permission_name",
        }
    }

    const fn resource(self) -> &'static str {
        match self {
            Self::Username | Self::Email => "user",
            Self::RoleName => "role",
            Self::PermissionName => "permission",
        }
    }

    const fn field(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
            Self::RoleName | Self::PermissionName => "name",
        }
    }

    /// Index key. Emails compare case-insensitively.
    pub(crate) fn key(self, value: &str) -> String {
        match self {
            Self::Email => format!("{}:{}", self.prefix(), value.to_lowercase()),
            _ => format!("{}:{value}", self.prefix()),
        }
    }
}

/// Handle to the identity database and its trees.
#[derive(Clone)]
pub struct IdentityDb {
    db: sled::Db,
    pub(crate) users: Tree,
    pub(crate) roles: Tree,
    pub(crate) permissions: Tree,
    pub(crate) grants: Tree,
    pub(crate) assignments: Tree,
    pub(crate) indexes: Tree,
}

impl IdentityDb {
    /// Open or create the database under `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, IdentityError> {
        let db = sled::open(path)
            .map_err(|e| IdentityError::Storage(format!("Failed to open identity database: {e}")))?;
        Self::with_db(db)
    }

    /// Use an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if a tree cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, IdentityError> {
        Ok(Self {
            users: db.open_tree("users")?,
            roles: db.open_tree("roles")?,
            permissions: db.open_tree("permissions")?,
            grants: db.open_tree("grants")?,
            assignments: db.open_tree("assignments")?,
            indexes: db.open_tree("indexes")?,
            db,
        })
    }

    /// In-memory database removed on drop.
    ///
    /// # Errors
    ///
    /// Returns error if sled cannot create it.
    pub fn temporary() -> Result<Self, IdentityError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    /// Underlying sled database.
    #[must_use]
    pub const fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Whether no user exists yet.
    #[must_use]
    pub fn has_no_users(&self) -> bool {
        self.users.is_empty()
    }

    /// Flush pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns error if the flush fails.
    pub async fn flush(&self) -> Result<(), IdentityError> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Owner id of a unique value.
    pub(crate) fn lookup(&self, index: Unique, value: &str) -> Result<Option<String>, IdentityError> {
        Ok(self
            .indexes
            .get(index.key(value).as_bytes())?
            .map(|id| String::from_utf8_lossy(&id).into_owned()))
    }

    /// Ids linked from one side of a join.
    pub(crate) fn links(tree: &Tree, side: &str, id: &str) -> Result<Vec<String>, IdentityError> {
        match tree.get(link_key(side, id).as_bytes())? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Permissions granted to a role, sorted by name.
    pub(crate) fn role_permissions(&self, role: &RoleId) -> Result<Vec<PermissionRef>, IdentityError> {
        let ids = Self::links(&self.grants, ROLE, role.as_str())?;
        let mut refs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = get_json::<Permission>(&self.permissions, &id)? {
                refs.push(PermissionRef::from(&p));
            }
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    /// Roles assigned to a user, sorted by name.
    pub(crate) fn user_roles(&self, user: &str) -> Result<Vec<RoleRef>, IdentityError> {
        let ids = Self::links(&self.assignments, USER, user)?;
        let mut refs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(role) = get_json::<RoleRecord>(&self.roles, &id)? {
                refs.push(RoleRef {
                    id: role.id,
                    name: role.name,
                });
            }
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    /// Union of the roles' permissions, deduplicated by id, sorted by name.
    pub(crate) fn flatten_permissions(&self, roles: &[RoleRef]) -> Result<Vec<PermissionRef>, IdentityError> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        for role in roles {
            for p in self.role_permissions(&role.id)? {
                if seen.insert(p.id.clone()) {
                    refs.push(p);
                }
            }
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(refs)
    }

    /// Total links recorded on one side of a join tree.
    #[cfg(test)]
    pub(crate) fn link_count(tree: &Tree, side: &str) -> usize {
        tree.scan_prefix(format!("{side}:").as_bytes())
            .filter_map(Result::ok)
            .map(|(_, raw)| serde_json::from_slice::<Vec<String>>(&raw).map_or(0, |v| v.len()))
            .sum()
    }
}

impl std::fmt::Debug for IdentityDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDb")
            .field("users", &self.users.len())
            .field("roles", &self.roles.len())
            .field("permissions", &self.permissions.len())
            .finish_non_exhaustive()
    }
}

fn link_key(side: &str, id: &str) -> String {
    format!("{side}:{id}")
}

/// Read a JSON row.
pub(crate) fn get_json<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>, IdentityError> {
    match tree.get(key.as_bytes())? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

/// Read every row of a tree.
pub(crate) fn scan_json<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, IdentityError> {
    let mut rows = Vec::new();
    for entry in tree.iter() {
        let (_, raw) = entry?;
        rows.push(serde_json::from_slice(&raw)?);
    }
    Ok(rows)
}

/// Read a JSON row inside a transaction.
pub(crate) fn tx_get<T: DeserializeOwned>(tree: &TransactionalTree, key: &str) -> TxResult<Option<T>> {
    match tree.get(key.as_bytes())? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(IdentityError::from)?)),
        None => Ok(None),
    }
}

/// Write a JSON row inside a transaction.
pub(crate) fn tx_put<T: Serialize>(tree: &TransactionalTree, key: &str, value: &T) -> TxResult<()> {
    let raw = serde_json::to_vec(value).map_err(IdentityError::from)?;
    tree.insert(key.as_bytes(), raw)?;
    Ok(())
}

/// Take a unique value for `owner`. Aborts with `Duplicate` if another id holds it.
pub(crate) fn claim(indexes: &TransactionalTree, index: Unique, value: &str, owner: &str) -> TxResult<()> {
    let key = index.key(value);
    if let Some(current) = indexes.get(key.as_bytes())? {
        if &*current != owner.as_bytes() {
            return Err(IdentityError::Duplicate {
                resource: index.resource(),
                field: index.field(),
                value: value.to_string(),
            }
            .into());
        }
    }
    indexes.insert(key.as_bytes(), owner.as_bytes())?;
    Ok(())
}

/// Check that every id in `ids` has a row in `rows`. Aborts with
/// `UnknownReference` naming the missing ones.
pub(crate) fn require_rows(
    rows: &TransactionalTree,
    ids: &[String],
    resource: &'static str,
    field: &'static str,
) -> TxResult<()> {
    let mut missing: Vec<String> = Vec::new();
    for id in ids {
        if rows.get(id.as_bytes())?.is_none() && !missing.contains(id) {
            missing.push(id.clone());
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    Err(IdentityError::UnknownReference {
        resource,
        field,
        missing,
    }
    .into())
}

/// Give up a unique value held by `owner`.
pub(crate) fn release(indexes: &TransactionalTree, index: Unique, value: &str, owner: &str) -> TxResult<()> {
    let key = index.key(value);
    if let Some(current) = indexes.get(key.as_bytes())? {
        if &*current == owner.as_bytes() {
            indexes.remove(key.as_bytes())?;
        }
    }
    Ok(())
}

/// Move a unique value from `old` to `new` for the same owner.
pub(crate) fn rename(
    indexes: &TransactionalTree,
    index: Unique,
    old: &str,
    new: &str,
    owner: &str,
) -> TxResult<()> {
    if index.key(old) == index.key(new) {
        return Ok(());
    }
    claim(indexes, index, new, owner)?;
    release(indexes, index, old, owner)
}

fn tx_links(tree: &TransactionalTree, side: &str, id: &str) -> TxResult<Vec<String>> {
    Ok(tx_get(tree, &link_key(side, id))?.unwrap_or_default())
}

fn tx_write_links(tree: &TransactionalTree, side: &str, id: &str, ids: &[String]) -> TxResult<()> {
    let key = link_key(side, id);
    if ids.is_empty() {
        tree.remove(key.as_bytes())?;
        Ok(())
    } else {
        tx_put(tree, &key, &ids)
    }
}

/// Replace the links of `side:id` with `targets`, keeping the reverse
/// lists on `other` in step. Duplicate targets collapse to one link.
pub(crate) fn replace_links(
    tree: &TransactionalTree,
    side: &str,
    id: &str,
    other: &str,
    targets: &[String],
) -> TxResult<()> {
    let mut next: Vec<String> = Vec::with_capacity(targets.len());
    for t in targets {
        if !next.contains(t) {
            next.push(t.clone());
        }
    }

    let current = tx_links(tree, side, id)?;

    for gone in current.iter().filter(|c| !next.contains(c)) {
        let mut reverse = tx_links(tree, other, gone)?;
        reverse.retain(|r| r != id);
        tx_write_links(tree, other, gone, &reverse)?;
    }

    for added in next.iter().filter(|n| !current.contains(n)) {
        let mut reverse = tx_links(tree, other, added)?;
        if !reverse.iter().any(|r| r == id) {
            reverse.push(id.to_string());
        }
        tx_write_links(tree, other, added, &reverse)?;
    }

    tx_write_links(tree, side, id, &next)
}

/// Remove every link of `side:id` in both directions.
pub(crate) fn unlink_all(tree: &TransactionalTree, side: &str, id: &str, other: &str) -> TxResult<()> {
    replace_links(tree, side, id, other, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn replace(tree: &Tree, side: &str, id: &str, other: &str, targets: &[&str]) {
        let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();
        tree.transaction(|tx| -> TxResult<()> { replace_links(tx, side, id, other, &targets) })
            .unwrap();
    }

    #[test]
    fn test_links_are_kept_in_both_directions() {
        let db = IdentityDb::temporary().unwrap();
        let grants = &db.grants;

        replace(grants, ROLE, "r1", PERMISSION, &["p1", "p2", "p2"]);
        replace(grants, ROLE, "r2", PERMISSION, &["p2"]);

        assert_eq!(IdentityDb::links(grants, ROLE, "r1").unwrap(), vec!["p1", "p2"]);
        assert_eq!(IdentityDb::links(grants, PERMISSION, "p2").unwrap(), vec!["r1", "r2"]);

        replace(grants, ROLE, "r1", PERMISSION, &["p3"]);
        assert_eq!(IdentityDb::links(grants, PERMISSION, "p1").unwrap(), Vec::<String>::new());
        assert_eq!(IdentityDb::links(grants, PERMISSION, "p2").unwrap(), vec!["r2"]);
        assert_eq!(IdentityDb::links(grants, PERMISSION, "p3").unwrap(), vec!["r1"]);
        assert_eq!(IdentityDb::link_count(grants, ROLE), 2);
        assert_eq!(IdentityDb::link_count(grants, PERMISSION), 2);

        grants
            .transaction(|tx| -> TxResult<()> { unlink_all(tx, PERMISSION, "p2", ROLE) })
            .unwrap();
        assert_eq!(IdentityDb::links(grants, ROLE, "r2").unwrap(), Vec::<String>::new());
        assert_eq!(IdentityDb::link_count(grants, ROLE), 1);
    }

    #[test]
    fn test_claim_rejects_other_owner() {
        let db = IdentityDb::temporary().unwrap();

        db.indexes
            .transaction(|tx| -> TxResult<()> { claim(tx, Unique::Email, "A@Example.com", "u1") })
            .unwrap();
        assert_eq!(
            db.lookup(Unique::Email, "a@example.com").unwrap(),
            Some("u1".to_string())
        );

        let err: IdentityError = db
            .indexes
            .transaction(|tx| -> TxResult<()> { claim(tx, Unique::Email, "a@EXAMPLE.com", "u2") })
            .unwrap_err()
            .into();
        assert!(matches!(err, IdentityError::Duplicate { field: "email", .. }));

        // Re-claiming your own value is a no-op.
        db.indexes
            .transaction(|tx| -> TxResult<()> { claim(tx, Unique::Email, "a@example.com", "u1") })
            .unwrap();
    }

    #[test]
    fn test_rename_moves_index() {
        let db = IdentityDb::temporary().unwrap();
        db.indexes
            .transaction(|tx| -> TxResult<()> {
                claim(tx, Unique::RoleName, "USER", "r1")?;
                rename(tx, Unique::RoleName, "USER", "MEMBER", "r1")
            })
            .unwrap();

        assert_eq!(db.lookup(Unique::RoleName, "USER").unwrap(), None);
        assert_eq!(db.lookup(Unique::RoleName, "MEMBER").unwrap(), Some("r1".to_string()));
    }
}
