use std::fmt;

use rocket::http::Status;
use thiserror::Error;

use crate::auth::permissions::Permission;

pub type AuthResult<T> = Result<T, AuthError>;

/// Why an authorization gate refused the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    Permission {
        permission: Permission,
        role: Option<String>,
    },
    RoleNames {
        allowed: Vec<String>,
        role: Option<String>,
    },
    RoleIds {
        allowed: Vec<i32>,
        role_id: Option<i32>,
    },
    Ownership,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Permission { permission, role } => write!(
                f,
                "Permission denied. Required permission: {}. Your role: {}",
                permission,
                role.as_deref().unwrap_or("none")
            ),
            Denial::RoleNames { allowed, role } => write!(
                f,
                "Access denied. Required roles: [{}]. Your role: {}",
                allowed.join(", "),
                role.as_deref().unwrap_or("none")
            ),
            Denial::RoleIds { allowed, role_id } => {
                let allowed: Vec<String> = allowed.iter().map(|id| id.to_string()).collect();
                write!(
                    f,
                    "Access denied. Required role IDs: [{}]. Your role ID: {}",
                    allowed.join(", "),
                    role_id.map(|id| id.to_string()).unwrap_or_else(|| "none".into())
                )
            }
            Denial::Ownership => write!(
                f,
                "Access denied. You can only access your own resources or need specific role."
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("not authenticated")]
    MissingCredentials,
    #[error("invalid authentication scheme")]
    InvalidScheme,
    #[error("token invalid")]
    InvalidToken,
    #[error("token revoked")]
    RevokedToken,
    #[error("access token required")]
    AccessTokenRequired,
    #[error("refresh token required")]
    RefreshTokenRequired,
    #[error("refresh token expired")]
    RefreshExpired,
    #[error("insufficient permission: {0}")]
    InsufficientPermission(Denial),
    #[error("revocation store unavailable: {0}")]
    RevocationUnavailable(String),
    #[error("malformed password hash: {0}")]
    MalformedHash(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Sqlx(#[from] rocket_db_pools::sqlx::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::InvalidCredentials | AuthError::RefreshExpired => Status::Unauthorized,
            AuthError::MissingCredentials
            | AuthError::InvalidScheme
            | AuthError::InvalidToken
            | AuthError::RevokedToken
            | AuthError::AccessTokenRequired
            | AuthError::RefreshTokenRequired
            | AuthError::InsufficientPermission(_) => Status::Forbidden,
            AuthError::RevocationUnavailable(_) => Status::ServiceUnavailable,
            AuthError::MalformedHash(_)
            | AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Jwt(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => Status::InternalServerError,
        }
    }

    /// Stable machine-readable code for client-facing failures.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidCredentials => Some("auth_login"),
            AuthError::MissingCredentials => Some("not_authenticated"),
            AuthError::InvalidScheme => Some("invalid_scheme"),
            AuthError::InvalidToken => Some("auth_token"),
            AuthError::RevokedToken => Some("token_revoked"),
            AuthError::AccessTokenRequired => Some("access_token_required"),
            AuthError::RefreshTokenRequired => Some("refresh_token_required"),
            AuthError::InsufficientPermission(_) => Some("insufficient_permissions"),
            AuthError::RevocationUnavailable(_) => Some("revocation_unavailable"),
            _ => None,
        }
    }

    /// Message shown to the client. `None` means the failure is internal.
    pub fn public_message(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidCredentials => Some("Invalid credentials"),
            AuthError::MissingCredentials => Some("Not authenticated"),
            AuthError::InvalidScheme => Some("Invalid authentication scheme."),
            AuthError::InvalidToken => Some("Token is invalid or expired"),
            AuthError::RevokedToken => Some("Token is invalid or has been revoked"),
            AuthError::AccessTokenRequired => Some("Please provide a valid access token"),
            AuthError::RefreshTokenRequired => Some("Please provide a valid refresh token"),
            AuthError::RefreshExpired => Some("Invalid or expired refresh token"),
            AuthError::InsufficientPermission(_) => {
                Some("You do not have enough permissions to perform this action")
            }
            AuthError::RevocationUnavailable(_) => Some("Token revocation service unavailable"),
            _ => None,
        }
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}
