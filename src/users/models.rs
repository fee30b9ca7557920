use rocket_db_pools::sqlx::FromRow;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::gates::Principal;
use crate::auth::jwt::Identity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

/// A stored account, including its password hash. Never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Option<Role>,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
        }
    }
}

impl Principal for UserRecord {
    fn principal_id(&self) -> i32 {
        self.id
    }

    fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role_id: i32,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub password_hash: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.password_hash.is_none()
    }
}
