use rocket_db_pools::sqlx::{self, PgPool};
use rocket_db_pools::Database;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Database)]
#[database("bookshelf_db")]
pub struct BookshelfDb(sqlx::PgPool);

/// Apply pending migrations under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
