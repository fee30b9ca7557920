use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::users::models::{NewUser, Role, UserRecord, UserUpdate};
use crate::users::store::{StoreResult, UserStore, UserStoreError, normalize_email};

#[derive(Debug, Clone)]
struct StoredUser {
    name: String,
    email: String,
    password_hash: String,
    role_id: i32,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i32, StoredUser>,
    roles: BTreeMap<i32, Role>,
    next_user_id: i32,
    next_role_id: i32,
}

impl Tables {
    fn record(&self, id: i32, user: &StoredUser) -> UserRecord {
        UserRecord {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: self.roles.get(&user.role_id).cloned(),
        }
    }

    fn role_named(&self, name: &str) -> Option<&Role> {
        let wanted = name.trim().to_lowercase();
        self.roles
            .values()
            .find(|role| role.name.to_lowercase() == wanted)
    }
}

/// In-process user and role tables.
///
/// Used by the test harness and single-node development setups. The lock is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    tables: RwLock<Tables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the four standard roles.
    pub fn with_standard_roles() -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for name in ["admin", "librarian", "user", "moderator"] {
                tables.next_role_id += 1;
                let id = tables.next_role_id;
                tables.roles.insert(
                    id,
                    Role {
                        id,
                        name: name.to_string(),
                    },
                );
            }
        }
        store
    }
}

#[rocket::async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user_by_id(&self, id: i32) -> StoreResult<Option<UserRecord>> {
        let tables = self.tables.read();
        Ok(tables.users.get(&id).map(|user| tables.record(id, user)))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let email = normalize_email(email);
        let tables = self.tables.read();
        Ok(tables
            .users
            .iter()
            .find(|(_, user)| user.email == email)
            .map(|(id, user)| tables.record(*id, user)))
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .users
            .iter()
            .map(|(id, user)| tables.record(*id, user))
            .collect())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let email = normalize_email(&user.email);
        let mut tables = self.tables.write();

        if tables.users.values().any(|existing| existing.email == email) {
            return Err(UserStoreError::DuplicateEmail(email));
        }
        if !tables.roles.contains_key(&user.role_id) {
            return Err(UserStoreError::RoleNotFound(user.role_id));
        }

        tables.next_user_id += 1;
        let id = tables.next_user_id;
        let stored = StoredUser {
            name: user.name,
            email,
            password_hash: user.password_hash,
            role_id: user.role_id,
        };
        let record = tables.record(id, &stored);
        tables.users.insert(id, stored);
        Ok(record)
    }

    async fn update_user(&self, id: i32, update: UserUpdate) -> StoreResult<UserRecord> {
        let mut tables = self.tables.write();
        let user = tables
            .users
            .get_mut(&id)
            .ok_or(UserStoreError::UserNotFound(id))?;

        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(password_hash) = update.password_hash {
            user.password_hash = password_hash;
        }

        let user = user.clone();
        Ok(tables.record(id, &user))
    }

    async fn delete_user(&self, id: i32) -> StoreResult<bool> {
        Ok(self.tables.write().users.remove(&id).is_some())
    }

    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        let name = name.trim();
        let mut tables = self.tables.write();

        if tables.role_named(name).is_some() {
            return Err(UserStoreError::DuplicateRole(name.to_string()));
        }

        tables.next_role_id += 1;
        let role = Role {
            id: tables.next_role_id,
            name: name.to_string(),
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn find_role_by_id(&self, id: i32) -> StoreResult<Option<Role>> {
        Ok(self.tables.read().roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        Ok(self.tables.read().role_named(name).cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        Ok(self.tables.read().roles.values().cloned().collect())
    }

    async fn assign_role(&self, user_id: i32, role_id: i32) -> StoreResult<UserRecord> {
        let mut tables = self.tables.write();
        if !tables.roles.contains_key(&role_id) {
            return Err(UserStoreError::RoleNotFound(role_id));
        }
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(UserStoreError::UserNotFound(user_id))?;
        user.role_id = role_id;

        let user = user.clone();
        Ok(tables.record(user_id, &user))
    }
}
