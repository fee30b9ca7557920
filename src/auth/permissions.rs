//! Role name to permission mapping.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::users::models::Role;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateUser,
    ReadUser,
    UpdateUser,
    DeleteUser,

    CreateBook,
    ReadBook,
    UpdateBook,
    DeleteBook,

    ManageRoles,
    AssignRoles,
    CreateRoles,
    ReadRoles,
    UpdateRoles,
    DeleteRoles,

    ViewAnalytics,
    SystemConfig,
}

impl Permission {
    pub const ALL: [Permission; 16] = [
        Permission::CreateUser,
        Permission::ReadUser,
        Permission::UpdateUser,
        Permission::DeleteUser,
        Permission::CreateBook,
        Permission::ReadBook,
        Permission::UpdateBook,
        Permission::DeleteBook,
        Permission::ManageRoles,
        Permission::AssignRoles,
        Permission::CreateRoles,
        Permission::ReadRoles,
        Permission::UpdateRoles,
        Permission::DeleteRoles,
        Permission::ViewAnalytics,
        Permission::SystemConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CreateUser => "create_user",
            Permission::ReadUser => "read_user",
            Permission::UpdateUser => "update_user",
            Permission::DeleteUser => "delete_user",
            Permission::CreateBook => "create_book",
            Permission::ReadBook => "read_book",
            Permission::UpdateBook => "update_book",
            Permission::DeleteBook => "delete_book",
            Permission::ManageRoles => "manage_roles",
            Permission::AssignRoles => "assign_roles",
            Permission::CreateRoles => "create_roles",
            Permission::ReadRoles => "read_roles",
            Permission::UpdateRoles => "update_roles",
            Permission::DeleteRoles => "delete_roles",
            Permission::ViewAnalytics => "view_analytics",
            Permission::SystemConfig => "system_config",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Permission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == value)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only lookup from lower-cased role name to its permission set.
///
/// Built once at startup and shared through `AuthState`. Roles missing from
/// the table resolve to the empty set, so unknown roles get nothing.
#[derive(Debug, Clone)]
pub struct PermissionTable {
    roles: HashMap<String, BTreeSet<Permission>>,
}

impl PermissionTable {
    pub fn builder() -> PermissionTableBuilder {
        PermissionTableBuilder::default()
    }

    /// The catalog's standard roles.
    pub fn standard() -> Self {
        use Permission::*;

        Self::builder()
            .role("admin", Permission::ALL)
            .role(
                "librarian",
                [
                    ReadUser,
                    UpdateUser,
                    CreateBook,
                    ReadBook,
                    UpdateBook,
                    DeleteBook,
                    ViewAnalytics,
                ],
            )
            .role("user", [ReadUser, ReadBook])
            .role(
                "moderator",
                [ReadUser, UpdateUser, ReadBook, UpdateBook, ViewAnalytics],
            )
            .build()
    }

    pub fn permissions_for_role(&self, role_name: &str) -> BTreeSet<Permission> {
        self.roles
            .get(&role_name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn role_has_permission(&self, role_name: &str, permission: Permission) -> bool {
        self.roles
            .get(&role_name.to_lowercase())
            .is_some_and(|set| set.contains(&permission))
    }

    /// False when the user has no role at all.
    pub fn has_permission(&self, role: Option<&Role>, permission: Permission) -> bool {
        role.is_some_and(|role| self.role_has_permission(&role.name, permission))
    }

    pub fn permissions_for(&self, role: Option<&Role>) -> BTreeSet<Permission> {
        role.map(|role| self.permissions_for_role(&role.name))
            .unwrap_or_default()
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }
}

impl Default for PermissionTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Default)]
pub struct PermissionTableBuilder {
    roles: HashMap<String, BTreeSet<Permission>>,
}

impl PermissionTableBuilder {
    pub fn role<I>(mut self, name: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = Permission>,
    {
        self.roles
            .entry(name.to_lowercase())
            .or_default()
            .extend(permissions);
        self
    }

    pub fn build(self) -> PermissionTable {
        PermissionTable { roles: self.roles }
    }
}
