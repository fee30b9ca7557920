//! Authorization policies layered on a resolved caller.
//!
//! These are plain checks; the request guards in [`crate::auth::guards`] and
//! the route handlers call them once the bearer token has been verified.

use crate::auth::error::Denial;
use crate::auth::permissions::{Permission, PermissionTable};
use crate::auth::{AuthError, AuthResult};
use crate::users::models::Role;

/// Anything the gates can inspect: an id and an optional role.
pub trait Principal {
    fn principal_id(&self) -> i32;
    fn role(&self) -> Option<&Role>;
}

pub fn require_permission<P: Principal + ?Sized>(
    table: &PermissionTable,
    principal: &P,
    permission: Permission,
) -> AuthResult<()> {
    if table.has_permission(principal.role(), permission) {
        Ok(())
    } else {
        log::debug!(
            "user {} denied: missing permission {}",
            principal.principal_id(),
            permission
        );
        Err(AuthError::InsufficientPermission(Denial::Permission {
            permission,
            role: principal.role().map(|role| role.name.clone()),
        }))
    }
}

/// Allow-list of roles, by name, by id, or both.
///
/// Every non-empty list must match; an empty list places no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAllowList {
    names: Vec<String>,
    ids: Vec<i32>,
}

impl RoleAllowList {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ids: Vec::new(),
        }
    }

    pub fn ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        Self {
            names: Vec::new(),
            ids: ids.into_iter().collect(),
        }
    }

    pub fn with_ids<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        self.ids.extend(ids);
        self
    }

    pub fn allows_name(&self, role: Option<&Role>) -> bool {
        role.is_some_and(|role| self.names.iter().any(|name| *name == role.name))
    }

    pub fn check<P: Principal + ?Sized>(&self, principal: &P) -> AuthResult<()> {
        let role = principal.role();

        if !self.names.is_empty() && !self.allows_name(role) {
            return Err(AuthError::InsufficientPermission(Denial::RoleNames {
                allowed: self.names.clone(),
                role: role.map(|role| role.name.clone()),
            }));
        }

        if !self.ids.is_empty() && !role.is_some_and(|role| self.ids.contains(&role.id)) {
            return Err(AuthError::InsufficientPermission(Denial::RoleIds {
                allowed: self.ids.clone(),
                role_id: role.map(|role| role.id),
            }));
        }

        Ok(())
    }
}

pub fn require_roles<P: Principal + ?Sized>(
    allowed: &RoleAllowList,
    principal: &P,
) -> AuthResult<()> {
    allowed.check(principal)
}

/// Owners may act on their own resource; everyone else needs an allowed role.
pub fn require_ownership_or_role<P: Principal + ?Sized>(
    principal: &P,
    owner_id: i32,
    allowed: &RoleAllowList,
) -> AuthResult<()> {
    if principal.principal_id() == owner_id || allowed.allows_name(principal.role()) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermission(Denial::Ownership))
    }
}
