#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod error;
pub mod request_logger;
pub mod routes;
pub mod users;

use crate::auth::config::RevocationBackend;
use crate::auth::revocation::spawn_purge_task;
use crate::auth::{
    AuthConfig, AuthState, MemoryRevocationStore, PasswordService, PermissionTable,
    PgRevocationStore, RevocationStore,
};
use crate::db::BookshelfDb;
use crate::request_logger::RequestLogger;
use crate::users::PgUserStore;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};
use std::time::Duration;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Every API route, plus the generated `openapi.json`, for mounting at `/api/v1`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health
        routes::health::health_check,
        // Auth
        auth::routes::login,
        auth::routes::refresh_token,
        auth::routes::logout,
        auth::routes::me,
        auth::routes::token_metadata,
        // Users
        users::routes::list_users,
        users::routes::create_user,
        users::routes::get_user,
        users::routes::update_user,
        users::routes::delete_user,
        // Roles
        users::routes::create_role,
        users::routes::list_roles,
        users::routes::assign_role,
    ]
}

/// Production auth state: users in Postgres, blocklist per configured backend.
pub fn auth_state_for_pool(
    config: AuthConfig,
    password_service: PasswordService,
    pool: PgPool,
) -> AuthState {
    let retention = config.revocation_retention();
    let revocations: Arc<dyn RevocationStore> = match config.revocation_backend {
        RevocationBackend::Memory => Arc::new(MemoryRevocationStore::new(retention)),
        RevocationBackend::Postgres => Arc::new(PgRevocationStore::new(pool.clone(), retention)),
    };

    AuthState::new(
        config,
        password_service,
        revocations,
        Arc::new(PgUserStore::new(pool)),
        PermissionTable::standard(),
    )
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(BookshelfDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match BookshelfDb::fetch(&rocket) {
                    Some(db) => match db::run_migrations(db).await {
                        Ok(_) => {
                            log::info!("database migrations successful");
                            Ok(rocket)
                        }
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    },
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite("Auth State", |rocket| async move {
            let config = match AuthConfig::from_env() {
                Ok(config) => config,
                Err(e) => {
                    log::error!("invalid auth configuration: {}", e);
                    return Err(rocket);
                }
            };
            let password_service = match PasswordService::new() {
                Ok(service) => service,
                Err(e) => {
                    log::error!("failed to initialise password hashing: {}", e);
                    return Err(rocket);
                }
            };
            let pool = match BookshelfDb::fetch(&rocket) {
                Some(db) => (**db).clone(),
                None => {
                    log::error!("database pool not available for auth state");
                    return Err(rocket);
                }
            };

            log::info!(
                "auth configured: {:?}, access ttl {}s, refresh ttl {}s, {:?} revocation store",
                config.jwt_algorithm,
                config.access_token_ttl_secs,
                config.refresh_token_ttl_secs,
                config.revocation_backend
            );
            let state = auth_state_for_pool(config, password_service, pool);
            Ok(rocket.manage(state))
        }))
        .attach(AdHoc::on_liftoff("Revocation Purge", |rocket| {
            Box::pin(async move {
                match rocket.state::<AuthState>() {
                    Some(state) => {
                        let every = Duration::from_secs(state.config.revocation_purge_secs);
                        spawn_purge_task(state.revocations.clone(), every);
                        log::info!("revoked token purge scheduled every {}s", every.as_secs());
                    }
                    None => log::error!("failed to schedule revoked token purge: auth state missing"),
                }
            })
        }))
        .register("/", error::catchers())
        .mount("/api/v1", api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Bookshelf API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::Arc;

    use jsonwebtoken::Algorithm;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};

    use crate::auth::config::RevocationBackend;
    use crate::auth::issuer::IssuedToken;
    use crate::auth::{
        AuthConfig, AuthState, MemoryRevocationStore, PasswordService, PermissionTable,
    };
    use crate::users::{MemoryUserStore, NewUser, Role, StoreResult, UserRecord};

    pub use database::{TestDatabase, TestDatabaseError};

    /// Short-lived, memory-backed configuration for tests.
    pub fn test_auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "bookshelf-test-secret".to_string(),
            jwt_algorithm: Algorithm::HS256,
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 2 * 24 * 60 * 60,
            jwt_leeway_secs: 0,
            revocation_backend: RevocationBackend::Memory,
            revocation_timeout_ms: 500,
            revocation_purge_secs: 3600,
        }
    }

    /// Argon2 with minimal cost so hashing stays fast under test.
    pub fn fast_password_service() -> PasswordService {
        PasswordService::with_params(1024, 1, 1).expect("argon2 params")
    }

    /// Auth state over in-memory stores seeded with the four standard roles.
    pub fn test_auth_state() -> AuthState {
        test_auth_state_with(test_auth_config())
    }

    pub fn test_auth_state_with(config: AuthConfig) -> AuthState {
        let revocations = Arc::new(MemoryRevocationStore::new(config.revocation_retention()));
        AuthState::new(
            config,
            fast_password_service(),
            revocations,
            Arc::new(MemoryUserStore::with_standard_roles()),
            PermissionTable::standard(),
        )
    }

    /// Convenience helpers for seeding roles and users through an `AuthState`.
    pub struct TestFixtures<'a> {
        state: &'a AuthState,
    }

    impl<'a> TestFixtures<'a> {
        pub fn new(state: &'a AuthState) -> Self {
            Self { state }
        }

        /// Find a role by name, creating it when missing.
        pub async fn role(&self, name: &str) -> StoreResult<Role> {
            match self.state.users.find_role_by_name(name).await? {
                Some(role) => Ok(role),
                None => self.state.users.create_role(name).await,
            }
        }

        /// Insert a user with a hashed password and the named role.
        pub async fn insert_user(
            &self,
            email: &str,
            name: &str,
            role: &str,
            password: &str,
        ) -> StoreResult<UserRecord> {
            let role = self.role(role).await?;
            let password_hash = self
                .state
                .password_service
                .hash_password(password)
                .expect("hash password");
            self.state
                .users
                .create_user(NewUser {
                    name: name.to_string(),
                    email: email.to_string(),
                    password_hash,
                    role_id: role.id,
                })
                .await
        }

        /// Mint an access/refresh pair for `user` without going through login.
        pub fn tokens_for(&self, user: &UserRecord) -> (IssuedToken, IssuedToken) {
            let identity = user.identity();
            let access = self
                .state
                .issuer
                .issue_access(&identity)
                .expect("issue access token");
            let refresh = self
                .state
                .issuer
                .issue_refresh(&identity)
                .expect("issue refresh token");
            (access, refresh)
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::ImageExt;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set and TEST_USE_CONTAINERS disabled")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Provision a fresh database on `TEST_DATABASE_URL`, or in a
            /// disposable container when `TEST_USE_CONTAINERS=1`.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    return Self::with_server(&url, None).await;
                }
                if std::env::var("TEST_USE_CONTAINERS").is_ok_and(|value| value == "1") {
                    return Self::new().await;
                }
                Err(TestDatabaseError::MissingUrl)
            }

            /// Provision a fresh database by launching a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().with_tag("16-alpine").start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::with_server(&admin_url, Some(container)).await
            }

            async fn with_server(
                url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "bookshelf".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        auth_state: Option<AuthState>,
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                auth_state: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        pub fn manage_auth_state(mut self, state: AuthState) -> Self {
            self.auth_state = Some(state);
            self
        }

        /// Finish building the Rocket instance with the request logger and API
        /// catchers in place.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment)
                .attach(crate::request_logger::RequestLogger)
                .register("/", crate::error::catchers());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(state) = self.auth_state {
                rocket = rocket.manage(state);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
