use rocket_db_pools::sqlx::{self, PgPool, Row, postgres::PgRow};

use crate::users::models::{NewUser, Role, UserRecord, UserUpdate};
use crate::users::store::{StoreResult, UserStore, UserStoreError, normalize_email};

const USER_COLUMNS: &str = r#"
    SELECT u.id, u.name, u.email, u.password_hash,
           r.id AS role_id, r.name AS role_name
    FROM users u
    LEFT JOIN roles r ON r.id = u.role_id
"#;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// `UserStore` over the `users` and `roles` tables.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_user(&self, id: i32) -> StoreResult<Option<UserRecord>> {
        let sql = format!("{USER_COLUMNS} WHERE u.id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<UserRecord> {
    let role_id: Option<i32> = row.try_get("role_id")?;
    let role_name: Option<String> = row.try_get("role_name")?;
    let role = match (role_id, role_name) {
        (Some(id), Some(name)) => Some(Role { id, name }),
        _ => None,
    };

    Ok(UserRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role,
    })
}

fn violates(err: &sqlx::Error, code: &str) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().map(|c| c == code).unwrap_or(false)
    )
}

#[rocket::async_trait]
impl UserStore for PgUserStore {
    async fn find_user_by_id(&self, id: i32) -> StoreResult<Option<UserRecord>> {
        self.fetch_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let sql = format!("{USER_COLUMNS} WHERE u.email = $1");
        let row = sqlx::query(&sql)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        let sql = format!("{USER_COLUMNS} ORDER BY u.id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<UserRecord> {
        let email = normalize_email(&user.email);
        let inserted = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO users (name, email, password_hash, role_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&user.name)
        .bind(&email)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .fetch_one(&self.pool)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(err) if violates(&err, UNIQUE_VIOLATION) => {
                return Err(UserStoreError::DuplicateEmail(email));
            }
            Err(err) if violates(&err, FOREIGN_KEY_VIOLATION) => {
                return Err(UserStoreError::RoleNotFound(user.role_id));
            }
            Err(err) => return Err(err.into()),
        };

        self.fetch_user(id)
            .await?
            .ok_or(UserStoreError::UserNotFound(id))
    }

    async fn update_user(&self, id: i32, update: UserUpdate) -> StoreResult<UserRecord> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                password_hash = COALESCE($3, password_hash)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.name)
        .bind(update.password_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserStoreError::UserNotFound(id));
        }

        self.fetch_user(id)
            .await?
            .ok_or(UserStoreError::UserNotFound(id))
    }

    async fn delete_user(&self, id: i32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_role(&self, name: &str) -> StoreResult<Role> {
        let name = name.trim();
        let inserted = sqlx::query_as::<_, Role>(
            "INSERT INTO roles (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(role) => Ok(role),
            Err(err) if violates(&err, UNIQUE_VIOLATION) => {
                Err(UserStoreError::DuplicateRole(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_role_by_id(&self, id: i32) -> StoreResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT id, name FROM roles WHERE lower(name) = lower($1)",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT id, name FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn assign_role(&self, user_id: i32, role_id: i32) -> StoreResult<UserRecord> {
        if self.find_role_by_id(role_id).await?.is_none() {
            return Err(UserStoreError::RoleNotFound(role_id));
        }

        let result = sqlx::query("UPDATE users SET role_id = $2 WHERE id = $1")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(UserStoreError::UserNotFound(user_id));
        }

        self.fetch_user(user_id)
            .await?
            .ok_or(UserStoreError::UserNotFound(user_id))
    }
}
