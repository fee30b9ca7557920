//! Authentication module: configuration, password hashing, token minting and
//! verification, the revocation blocklist, Rocket request guards, and the
//! login/refresh/logout routes.

use std::sync::Arc;

pub mod bearer;
pub mod config;
pub mod error;
pub mod gates;
pub mod guards;
pub mod issuer;
pub mod jwt;
pub mod passwords;
pub mod permissions;
pub mod responses;
pub mod revocation;
pub mod routes;

pub use bearer::{AccessToken, BearerExtractor, RefreshToken};
pub use config::{AuthConfig, RevocationBackend};
pub use error::{AuthError, AuthResult, Denial};
pub use guards::{Authorized, CurrentUser, RequireAdmin};
pub use issuer::TokenIssuer;
pub use jwt::{Identity, TokenCodec, TokenKind, TokenPayload};
pub use passwords::PasswordService;
pub use permissions::{Permission, PermissionTable};
pub use revocation::{MemoryRevocationStore, PgRevocationStore, RevocationStore};

use crate::users::SharedUserStore;

/// Everything request guards and auth routes need, managed as Rocket state.
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub password_service: Arc<PasswordService>,
    pub issuer: Arc<TokenIssuer>,
    pub revocations: Arc<dyn RevocationStore>,
    pub users: SharedUserStore,
    pub permissions: Arc<PermissionTable>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        password_service: PasswordService,
        revocations: Arc<dyn RevocationStore>,
        users: SharedUserStore,
        permissions: PermissionTable,
    ) -> Self {
        let issuer = TokenIssuer::from_config(&config);
        Self {
            config,
            password_service: Arc::new(password_service),
            issuer: Arc::new(issuer),
            revocations,
            users,
            permissions: Arc::new(permissions),
        }
    }
}
