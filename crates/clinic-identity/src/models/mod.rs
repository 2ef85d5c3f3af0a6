//! Identity data model: users, roles, permissions and their write descriptors.
//!
//! `User::roles`, `User::permissions` and `Role::permissions` are read-time
//! views resolved from the join rows; they are never stored on the owning row.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Name of the distinguished administrator role.
pub const ADMIN_ROLE: &str = "ADMIN";

macro_rules! string_id {
    ($t:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub String);

        impl $t {
            /// Wrap an existing identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(UserId, "Identifier of a user.");
string_id!(RoleId, "Identifier of a role.");
string_id!(PermissionId, "Identifier of a permission.");

/// Next `updatedAt`-style timestamp after `previous`.
///
/// Always strictly later than `previous`, even when the wall clock has not
/// advanced since.
#[must_use]
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

// ============================================================================
// Permission
// ============================================================================

/// A named capability on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Unique id.
    pub id: PermissionId,
    /// Unique name (e.g. `user_management`).
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Resource the permission applies to.
    pub resource: String,
    /// Action on the resource.
    pub action: String,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last changed.
    pub updated_at: DateTime<Utc>,
}

/// A permission as seen through a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRef {
    /// Permission id.
    pub id: PermissionId,
    /// Permission name.
    pub name: String,
    /// Resource.
    pub resource: String,
    /// Action.
    pub action: String,
}

impl From<&Permission> for PermissionRef {
    fn from(p: &Permission) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            resource: p.resource.clone(),
            action: p.action.clone(),
        }
    }
}

/// Descriptor for creating a permission.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePermission {
    /// Unique name.
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    /// Optional description.
    #[serde(default)]
    #[validate(length(max = 512))]
    pub description: Option<String>,
    /// Resource.
    #[validate(length(min = 1, max = 128))]
    pub resource: String,
    /// Action.
    #[validate(length(min = 1, max = 64))]
    pub action: String,
}

impl CreatePermission {
    /// Descriptor with no description.
    #[must_use]
    pub fn new(name: impl Into<String>, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            resource: resource.into(),
            action: action.into(),
        }
    }
}

/// Partial update of a permission. Only supplied fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePermission {
    /// New name.
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    /// New description.
    #[validate(length(max = 512))]
    pub description: Option<String>,
    /// New resource.
    #[validate(length(min = 1, max = 128))]
    pub resource: Option<String>,
    /// New action.
    #[validate(length(min = 1, max = 64))]
    pub action: Option<String>,
}

// ============================================================================
// Role
// ============================================================================

/// A named set of granted permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Unique id.
    pub id: RoleId,
    /// Unique name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Granted permissions (resolved at read time).
    #[serde(default)]
    pub permissions: Vec<PermissionRef>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last changed.
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Ids of the granted permissions.
    #[must_use]
    pub fn permission_ids(&self) -> Vec<PermissionId> {
        self.permissions.iter().map(|p| p.id.clone()).collect()
    }
}

/// A role as seen through an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    /// Role id.
    pub id: RoleId,
    /// Role name.
    pub name: String,
}

/// Descriptor for creating a role.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRole {
    /// Unique name.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Optional description.
    #[serde(default)]
    #[validate(length(max = 512))]
    pub description: Option<String>,
    /// Permissions to grant. `None` grants nothing.
    #[serde(default)]
    pub permissions: Option<Vec<PermissionId>>,
}

impl CreateRole {
    /// Descriptor with no description or grants.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            permissions: None,
        }
    }

    /// Grant these permissions.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Vec<PermissionId>) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Partial update of a role.
///
/// A supplied `permissions` list replaces the whole grant set; `None`
/// leaves grants untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRole {
    /// New name.
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    /// New description.
    #[validate(length(max = 512))]
    pub description: Option<String>,
    /// Replacement grant set.
    pub permissions: Option<Vec<PermissionId>>,
}

// ============================================================================
// User
// ============================================================================

/// User account with its resolved roles and permissions.
///
/// The password credential stays in the store and is never part of this view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique id.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Clinic tag.
    #[serde(default)]
    pub clinic_id: Option<String>,
    /// Whether the account may log in.
    pub is_active: bool,
    /// Last successful credential validation.
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last changed.
    pub updated_at: DateTime<Utc>,
    /// Assigned roles (resolved at read time).
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    /// Union of the assigned roles' permissions, deduplicated.
    #[serde(default)]
    pub permissions: Vec<PermissionRef>,
}

impl User {
    /// Names of the assigned roles.
    #[must_use]
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }

    /// Ids of the assigned roles.
    #[must_use]
    pub fn role_ids(&self) -> Vec<RoleId> {
        self.roles.iter().map(|r| r.id.clone()).collect()
    }

    /// Names of the flattened permissions.
    #[must_use]
    pub fn permission_names(&self) -> Vec<String> {
        self.permissions.iter().map(|p| p.name.clone()).collect()
    }

    /// Whether the user holds a role by name.
    #[must_use]
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }

    /// Whether the user holds the administrator role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Whether the user holds a permission by name. Administrators hold all.
    #[must_use]
    pub fn has_permission(&self, name: &str) -> bool {
        self.is_admin() || self.permissions.iter().any(|p| p.name == name)
    }

    /// Display name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.username.clone(),
        }
    }
}

/// Descriptor for creating a user.
#[derive(Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    /// Unique login name.
    #[validate(length(min = 3, max = 64))]
    pub username: String,
    /// Unique email address.
    #[validate(email)]
    pub email: String,
    /// Plaintext password, hashed by the store.
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    /// Given name.
    #[serde(default)]
    #[validate(length(max = 128))]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default)]
    #[validate(length(max = 128))]
    pub last_name: Option<String>,
    /// Clinic tag.
    #[serde(default)]
    pub clinic_id: Option<String>,
    /// Whether the account may log in. Defaults to active.
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Roles to assign. `None` assigns nothing.
    #[serde(default)]
    pub roles: Option<Vec<RoleId>>,
}

impl CreateUser {
    /// Descriptor with only the required fields.
    #[must_use]
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            first_name: None,
            last_name: None,
            clinic_id: None,
            is_active: None,
            roles: None,
        }
    }

    /// Assign these roles.
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<RoleId>) -> Self {
        self.roles = Some(roles);
        self
    }
}

impl fmt::Debug for CreateUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("clinic_id", &self.clinic_id)
            .field("is_active", &self.is_active)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Partial update of a user.
///
/// A supplied `roles` list replaces the whole assignment set; `None`
/// leaves assignments untouched.
#[derive(Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    /// New login name.
    #[validate(length(min = 3, max = 64))]
    pub username: Option<String>,
    /// New email address.
    #[validate(email)]
    pub email: Option<String>,
    /// New plaintext password.
    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,
    /// New given name.
    #[validate(length(max = 128))]
    pub first_name: Option<String>,
    /// New family name.
    #[validate(length(max = 128))]
    pub last_name: Option<String>,
    /// New clinic tag.
    pub clinic_id: Option<String>,
    /// Activate or deactivate.
    pub is_active: Option<bool>,
    /// Replacement assignment set.
    pub roles: Option<Vec<RoleId>>,
}

impl fmt::Debug for UpdateUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("clinic_id", &self.clinic_id)
            .field("is_active", &self.is_active)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Login credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Plaintext password.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
