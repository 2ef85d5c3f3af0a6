//! Sled-backed user store.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_core::{PageRequest, Paginated};
use serde::{Deserialize, Serialize};
use sled::Transactional;

use super::UserStore;
use super::db::{
    IdentityDb, ROLE, TxResult, USER, Unique, claim, get_json, release, rename, replace_links,
    require_rows, scan_json, tx_get, tx_put, unlink_all,
};
use crate::error::IdentityError;
use crate::models::{CreateUser, RoleId, UpdateUser, User, UserId, next_timestamp};
use crate::password::{Argon2Hasher, PasswordHasher};

/// Stored user row. Assignments live in the `assignments` tree.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    id: UserId,
    username: String,
    email: String,
    password_hash: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    clinic_id: Option<String>,
    is_active: bool,
    #[serde(default)]
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Verified against when a username does not resolve.
const DUMMY_PASSWORD: &str = "clinic-identity-dummy-password";

fn link_ids(ids: &[RoleId]) -> Vec<String> {
    ids.iter().map(ToString::to_string).collect()
}

/// User store over [`IdentityDb`].
#[derive(Clone)]
pub struct SledUserStore {
    db: IdentityDb,
    hasher: Arc<dyn PasswordHasher>,
    dummy_hash: Arc<OnceLock<String>>,
}

impl SledUserStore {
    /// Create a store hashing with Argon2id defaults.
    #[must_use]
    pub fn new(db: IdentityDb) -> Self {
        Self::with_hasher(db, Arc::new(Argon2Hasher::default()))
    }

    /// Create a store with a custom hasher.
    #[must_use]
    pub fn with_hasher(db: IdentityDb, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            db,
            hasher,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    async fn hash(&self, password: String) -> Result<String, IdentityError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| IdentityError::Hashing(format!("Hashing task failed: {e}")))?
    }

    async fn verify(&self, password: &str, hash: String) -> Result<bool, IdentityError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| IdentityError::Hashing(format!("Verification task failed: {e}")))
    }

    /// Hash of [`DUMMY_PASSWORD`], computed on first use.
    async fn dummy_hash(&self) -> Result<String, IdentityError> {
        if let Some(hash) = self.dummy_hash.get() {
            return Ok(hash.clone());
        }
        let hash = self.hash(DUMMY_PASSWORD.to_string()).await?;
        Ok(self.dummy_hash.get_or_init(|| hash).clone())
    }

    fn resolve(&self, record: UserRecord) -> Result<User, IdentityError> {
        let roles = self.db.user_roles(record.id.as_str())?;
        let permissions = self.db.flatten_permissions(&roles)?;

        Ok(User {
            id: record.id,
            username: record.username,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            clinic_id: record.clinic_id,
            is_active: record.is_active,
            last_login_at: record.last_login_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
            roles,
            permissions,
        })
    }

    fn record(&self, id: &str) -> Result<Option<UserRecord>, IdentityError> {
        get_json(&self.db.users, id)
    }

    fn get(&self, id: &str) -> Result<Option<User>, IdentityError> {
        self.record(id)?.map(|r| self.resolve(r)).transpose()
    }

    fn by_index(&self, index: Unique, value: &str) -> Result<Option<User>, IdentityError> {
        match self.db.lookup(index, value)? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for SledUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledUserStore")
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UserStore for SledUserStore {
    async fn create(&self, input: CreateUser) -> Result<User, IdentityError> {
        let password_hash = self.hash(input.password.clone()).await?;
        let now = Utc::now();
        let record = UserRecord {
            id: UserId::generate(),
            password_hash,
            username: input.username,
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            clinic_id: input.clinic_id,
            is_active: input.is_active.unwrap_or(true),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        let roles = link_ids(input.roles.as_deref().unwrap_or_default());

        (
            &self.db.users,
            &self.db.roles,
            &self.db.assignments,
            &self.db.indexes,
        )
            .transaction(|(users, role_rows, assignments, indexes)| -> TxResult<()> {
                let id = record.id.as_str();
                require_rows(role_rows, &roles, ROLE, "roles")?;
                claim(indexes, Unique::Username, &record.username, id)?;
                claim(indexes, Unique::Email, &record.email, id)?;
                tx_put(users, id, &record)?;
                replace_links(assignments, USER, id, ROLE, &roles)
            })?;
        self.db.flush().await?;

        tracing::debug!(id = %record.id, username = %record.username, roles = roles.len(), "User created");
        self.resolve(record)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, IdentityError> {
        self.get(id.as_str())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, IdentityError> {
        self.by_index(Unique::Username, username)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, IdentityError> {
        self.by_index(Unique::Email, email)
    }

    async fn find_all(&self, page: PageRequest) -> Result<Paginated<User>, IdentityError> {
        let mut rows: Vec<UserRecord> = scan_json(&self.db.users)?;
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

    async fn update(&self, id: &UserId, input: UpdateUser) -> Result<Option<User>, IdentityError> {
        let password_hash = match input.password.clone() {
            Some(password) => Some(self.hash(password).await?),
            None => None,
        };
        let roles = input.roles.as_deref().map(link_ids);

        let updated = (
            &self.db.users,
            &self.db.roles,
            &self.db.assignments,
            &self.db.indexes,
        )
            .transaction(|(users, role_rows, assignments, indexes)| -> TxResult<Option<UserRecord>> {
                let Some(mut record) = tx_get::<UserRecord>(users, id.as_str())? else {
                    return Ok(None);
                };

                if let Some(username) = &input.username {
                    rename(indexes, Unique::Username, &record.username, username, id.as_str())?;
                    record.username.clone_from(username);
                }
                if let Some(email) = &input.email {
                    rename(indexes, Unique::Email, &record.email, email, id.as_str())?;
                    record.email.clone_from(email);
                }
                if let Some(hash) = &password_hash {
                    record.password_hash.clone_from(hash);
                }
                if let Some(first_name) = &input.first_name {
                    record.first_name = Some(first_name.clone());
                }
                if let Some(last_name) = &input.last_name {
                    record.last_name = Some(last_name.clone());
                }
                if let Some(clinic_id) = &input.clinic_id {
                    record.clinic_id = Some(clinic_id.clone());
                }
                if let Some(is_active) = input.is_active {
                    record.is_active = is_active;
                }
                if let Some(roles) = &roles {
                    require_rows(role_rows, roles, ROLE, "roles")?;
                    replace_links(assignments, USER, id.as_str(), ROLE, roles)?;
                }
                record.updated_at = next_timestamp(record.updated_at);

                tx_put(users, id.as_str(), &record)?;
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

    async fn delete(&self, id: &UserId) -> Result<bool, IdentityError> {
        let deleted = (&self.db.users, &self.db.assignments, &self.db.indexes).transaction(
            |(users, assignments, indexes)| -> TxResult<bool> {
                let Some(record) = tx_get::<UserRecord>(users, id.as_str())? else {
                    return Ok(false);
                };

                unlink_all(assignments, USER, id.as_str(), ROLE)?;
                release(indexes, Unique::Username, &record.username, id.as_str())?;
                release(indexes, Unique::Email, &record.email, id.as_str())?;
                users.remove(id.as_str().as_bytes())?;
                Ok(true)
            },
        )?;

        if deleted {
            self.db.flush().await?;
            tracing::debug!(id = %id, "User deleted");
        }
        Ok(deleted)
    }

    async fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, IdentityError> {
        let mut found: Vec<User> = Vec::with_capacity(ids.len());
        for id in ids {
            if found.iter().any(|u| &u.id == id) {
                continue;
            }
            if let Some(user) = self.get(id.as_str())? {
                found.push(user);
            }
        }
        Ok(found)
    }

    async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, IdentityError> {
        let record = match self.db.lookup(Unique::Username, username)? {
            Some(id) => self.record(&id)?,
            None => None,
        };

        // Unknown usernames cost one verification too.
        let Some(record) = record else {
            let dummy = self.dummy_hash().await?;
            self.verify(password, dummy).await?;
            return Ok(false);
        };

        self.verify(password, record.password_hash).await
    }

    async fn record_login(&self, id: &UserId) -> Result<Option<User>, IdentityError> {
        let updated = self.db.users.transaction(|users| -> TxResult<Option<UserRecord>> {
            let Some(mut record) = tx_get::<UserRecord>(users, id.as_str())? else {
                return Ok(None);
            };

            let previous = record.last_login_at.unwrap_or(record.created_at);
            record.last_login_at = Some(next_timestamp(previous));
            tx_put(users, id.as_str(), &record)?;
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
}
