use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use bookshelf_api::auth::PasswordService;
use bookshelf_api::db::run_migrations;
use bookshelf_api::users::{NewUser, PgUserStore, UserStore, UserStoreError};

#[derive(Parser, Debug)]
#[command(
    name = "create_user",
    about = "Create a Bookshelf user account, e.g. the first administrator"
)]
struct Args {
    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Plaintext password to hash and store for this user.
    #[arg(long)]
    password: String,

    /// Display name for the account.
    #[arg(long)]
    name: String,

    /// Role name to assign; created when it does not exist yet.
    #[arg(long, default_value = "user")]
    role: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let email = args.email.trim().to_lowercase();

    if !email.contains('@') {
        writeln!(io::stderr(), "error: email must contain '@'")?;
        std::process::exit(1);
    }
    if args.role.trim().is_empty() {
        writeln!(io::stderr(), "error: role must not be empty")?;
        std::process::exit(1);
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    run_migrations(&pool).await?;

    let store = PgUserStore::new(pool);

    if store.find_user_by_email(&email).await?.is_some() {
        writeln!(
            io::stderr(),
            "error: a user with email '{email}' already exists."
        )?;
        std::process::exit(1);
    }

    let role = match store.find_role_by_name(&args.role).await? {
        Some(role) => role,
        None => {
            log::info!("role '{}' not found, creating it", args.role.trim());
            store.create_role(&args.role).await?
        }
    };

    let password_service = PasswordService::new()?;
    let password_hash = password_service.hash_password(&args.password)?;

    let user = match store
        .create_user(NewUser {
            name: args.name.trim().to_string(),
            email: email.clone(),
            password_hash,
            role_id: role.id,
        })
        .await
    {
        Ok(user) => user,
        Err(UserStoreError::DuplicateEmail(_)) => {
            writeln!(
                io::stderr(),
                "error: a user with email '{email}' already exists."
            )?;
            std::process::exit(1);
        }
        Err(err) => return Err(err.into()),
    };

    println!(
        "Created {} user '{}' with id {}",
        role.name, user.email, user.id
    );
    Ok(())
}
