use std::str::FromStr;

use chrono::{Duration, Utc};
use jsonwebtoken::Algorithm;

use crate::auth::{AuthError, AuthResult};

/// Where revoked token identifiers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationBackend {
    Memory,
    Postgres,
}

impl FromStr for RevocationBackend {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(RevocationBackend::Memory),
            "postgres" | "postgresql" => Ok(RevocationBackend::Postgres),
            other => Err(AuthError::Config(format!(
                "unsupported revocation backend '{other}'"
            ))),
        }
    }
}

/// Authentication configuration loaded from environment variables.
///
/// Built once at startup and handed to the token codec and issuer; nothing
/// in the auth subsystem reads the environment after that.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_algorithm: Algorithm,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub jwt_leeway_secs: u64,
    pub revocation_backend: RevocationBackend,
    pub revocation_timeout_ms: u64,
    pub revocation_purge_secs: u64,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("BOOKSHELF_JWT_SECRET")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AuthError::Config("BOOKSHELF_JWT_SECRET is required".into()))?;
        let jwt_algorithm = match lookup("BOOKSHELF_JWT_ALGORITHM") {
            Some(value) => parse_algorithm(&value)?,
            None => Algorithm::HS256,
        };
        let jwt_leeway_secs = parse_var(&lookup, "BOOKSHELF_JWT_LEEWAY_SECS", 0u64)?;
        let leeway = i64::try_from(jwt_leeway_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                AuthError::Config(format!(
                    "BOOKSHELF_JWT_LEEWAY_SECS={jwt_leeway_secs} is out of range"
                ))
            })?;
        let access_token_ttl_secs = token_lifetime(
            "BOOKSHELF_ACCESS_TOKEN_TTL_SECS",
            parse_var(&lookup, "BOOKSHELF_ACCESS_TOKEN_TTL_SECS", 900i64)?,
            leeway,
        )?;
        let refresh_token_ttl_secs = token_lifetime(
            "BOOKSHELF_REFRESH_TOKEN_TTL_SECS",
            parse_var(&lookup, "BOOKSHELF_REFRESH_TOKEN_TTL_SECS", 2 * 24 * 60 * 60i64)?,
            leeway,
        )?;
        let revocation_backend = match lookup("BOOKSHELF_REVOCATION_BACKEND") {
            Some(value) => value.parse()?,
            None => RevocationBackend::Postgres,
        };
        let revocation_timeout_ms = positive(
            "BOOKSHELF_REVOCATION_TIMEOUT_MS",
            parse_var(&lookup, "BOOKSHELF_REVOCATION_TIMEOUT_MS", 500u64)?,
        )?;
        let revocation_purge_secs = positive(
            "BOOKSHELF_REVOCATION_PURGE_SECS",
            parse_var(&lookup, "BOOKSHELF_REVOCATION_PURGE_SECS", 60 * 60u64)?,
        )?;

        Ok(Self {
            jwt_secret,
            jwt_algorithm,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            jwt_leeway_secs,
            revocation_backend,
            revocation_timeout_ms,
            revocation_purge_secs,
        })
    }

    /// How long a revoked `jti` must stay on the blocklist.
    ///
    /// Covers the longest token lifetime plus the decode leeway, so an entry
    /// never lapses while the token it blocks could still verify.
    ///
    /// Saturates at `Duration::MAX` for hand-built configs that `from_lookup`
    /// would have rejected.
    pub fn revocation_retention(&self) -> Duration {
        let longest = self.access_token_ttl_secs.max(self.refresh_token_ttl_secs);
        let leeway = i64::try_from(self.jwt_leeway_secs)
            .ok()
            .and_then(Duration::try_seconds);
        Duration::try_seconds(longest)
            .zip(leeway)
            .and_then(|(ttl, leeway)| ttl.checked_add(&leeway))
            .unwrap_or(Duration::MAX)
    }

    pub fn revocation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.revocation_timeout_ms)
    }
}

/// Missing keys take the default; present but unparseable values are an error.
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> AuthResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AuthError::Config(format!("{key}='{raw}' is not a valid number"))),
        None => Ok(default),
    }
}

fn positive(key: &str, value: u64) -> AuthResult<u64> {
    if value == 0 {
        return Err(AuthError::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

/// A lifetime must be positive and land, leeway included, inside the range
/// chrono can represent as an expiry timestamp.
fn token_lifetime(key: &str, secs: i64, leeway: Duration) -> AuthResult<i64> {
    if secs <= 0 {
        return Err(AuthError::Config(format!("{key} must be greater than zero")));
    }
    Duration::try_seconds(secs)
        .and_then(|ttl| ttl.checked_add(&leeway))
        .and_then(|window| Utc::now().checked_add_signed(window))
        .ok_or_else(|| {
            AuthError::Config(format!(
                "{key}={secs} puts token expiry beyond the representable date range"
            ))
        })?;
    Ok(secs)
}

fn parse_algorithm(value: &str) -> AuthResult<Algorithm> {
    let algorithm = Algorithm::from_str(value.trim())
        .map_err(|_| AuthError::Config(format!("unknown JWT algorithm '{value}'")))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => Err(AuthError::Config(format!(
            "JWT algorithm {other:?} needs an asymmetric key; only HS256/HS384/HS512 are supported"
        ))),
    }
}
