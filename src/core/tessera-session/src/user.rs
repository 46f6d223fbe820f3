//! The authenticated user.

use serde::{Deserialize, Serialize};
use tessera_access::{self as access, Action, Module, Permission, Role};
use tracing::warn;

use crate::AuthError;

/// User record as returned by the Identity Service's `me`/`verify` calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique account identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Preferred display name.
    #[serde(default, alias = "displayName", alias = "name")]
    pub display_name: Option<String>,
    /// First name.
    #[serde(default, alias = "firstName", alias = "given_name")]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default, alias = "lastName", alias = "family_name")]
    pub last_name: Option<String>,
    /// Granted role names.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Role the server considers current, if any.
    #[serde(default, alias = "activeRole")]
    pub active_role: Option<String>,
    /// Tenant / organization identifier.
    #[serde(default, alias = "organizationId")]
    pub organization_id: Option<String>,
    /// Whether multi-factor authentication is enabled.
    #[serde(default, alias = "mfaEnabled")]
    pub mfa_enabled: bool,
    /// Creation timestamp (RFC 3339).
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    /// Last update timestamp (RFC 3339).
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
}

/// The signed-in user with a resolved active role.
///
/// `active_role` is always one of `roles`, and `permissions` always equals
/// the policy table entry for `active_role`. Both only change together via
/// [`User::with_active_role`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    /// Unique account identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name.
    pub display_name: String,
    /// Tenant / organization identifier.
    pub organization_id: Option<String>,
    /// Whether multi-factor authentication is enabled.
    pub mfa_enabled: bool,
    /// Creation timestamp (RFC 3339).
    pub created_at: Option<String>,
    /// Last update timestamp (RFC 3339).
    pub updated_at: Option<String>,
    roles: Vec<Role>,
    active_role: Role,
    permissions: Vec<Permission>,
}

impl User {
    /// Builds a user from an Identity Service record.
    ///
    /// Unrecognized role names are skipped. The active role is `preferred`
    /// if granted, otherwise the record's own active role if granted,
    /// otherwise the first granted role.
    ///
    /// # Errors
    ///
    /// [`AuthError::Identity`] if the record grants no recognized role.
    pub fn from_record(record: UserRecord, preferred: Option<Role>) -> Result<Self, AuthError> {
        let mut roles: Vec<Role> = Vec::with_capacity(record.roles.len());
        for name in &record.roles {
            match name.parse::<Role>() {
                Ok(role) if !roles.contains(&role) => roles.push(role),
                Ok(_) => {},
                Err(_) => warn!(user_id = %record.id, role = %name, "Ignoring unknown role"),
            }
        }

        let Some(&first) = roles.first() else {
            return Err(AuthError::Identity(format!(
                "user {} has no recognized roles",
                record.id
            )));
        };

        let server_active = record
            .active_role
            .as_deref()
            .and_then(|name| name.parse::<Role>().ok());

        let active_role = preferred
            .into_iter()
            .chain(server_active)
            .find(|r| roles.contains(r))
            .unwrap_or(first);

        let display_name = match (&record.display_name, &record.first_name, &record.last_name) {
            (Some(name), _, _) if !name.trim().is_empty() => name.clone(),
            (_, Some(first), Some(last)) => format!("{} {}", first, last),
            (_, Some(first), None) => first.clone(),
            (_, None, Some(last)) => last.clone(),
            _ => record.email.clone(),
        };

        Ok(Self {
            id: record.id,
            email: record.email,
            display_name,
            organization_id: record.organization_id,
            mfa_enabled: record.mfa_enabled,
            created_at: record.created_at,
            updated_at: record.updated_at,
            roles,
            active_role,
            permissions: access::permissions_for(active_role).to_vec(),
        })
    }

    /// Returns a copy of this user acting as `role`.
    ///
    /// # Errors
    ///
    /// [`AuthError::RoleNotGranted`] if `role` is not among the user's roles.
    pub fn with_active_role(&self, role: Role) -> Result<Self, AuthError> {
        if !self.has_role(role) {
            return Err(AuthError::RoleNotGranted(role));
        }

        Ok(Self {
            active_role: role,
            permissions: access::permissions_for(role).to_vec(),
            ..self.clone()
        })
    }

    /// Granted roles.
    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Role currently governing permissions.
    pub fn active_role(&self) -> Role {
        self.active_role
    }

    /// Permissions of the active role.
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Checks if `role` was granted.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// May the active role view `module`?
    pub fn can_access(&self, module: Module) -> bool {
        access::can_access_module(self.active_role, module)
    }

    /// May the active role perform `action` on `module`?
    pub fn can(&self, action: Action, module: Module) -> bool {
        access::can_access_module(self.active_role, module)
            && access::has_action(&self.permissions, module, action)
    }
}
