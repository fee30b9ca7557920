use std::sync::Arc;

use thiserror::Error;

use crate::users::models::{NewUser, Role, UserRecord, UserUpdate};

pub type StoreResult<T> = Result<T, UserStoreError>;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("role '{0}' already exists")]
    DuplicateRole(String),
    #[error("user {0} not found")]
    UserNotFound(i32),
    #[error("role {0} not found")]
    RoleNotFound(i32),
    #[error("database error: {0}")]
    Database(#[from] rocket_db_pools::sqlx::Error),
}

/// Persistence for users and roles.
///
/// Emails are stored lower-cased. Role names are unique regardless of case.
#[rocket::async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_id(&self, id: i32) -> StoreResult<Option<UserRecord>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>>;

    async fn create_user(&self, user: NewUser) -> StoreResult<UserRecord>;

    async fn update_user(&self, id: i32, update: UserUpdate) -> StoreResult<UserRecord>;

    /// Returns whether a row was removed.
    async fn delete_user(&self, id: i32) -> StoreResult<bool>;

    async fn create_role(&self, name: &str) -> StoreResult<Role>;

    async fn find_role_by_id(&self, id: i32) -> StoreResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    async fn assign_role(&self, user_id: i32, role_id: i32) -> StoreResult<UserRecord>;
}

pub type SharedUserStore = Arc<dyn UserStore>;

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
