//! Bearer credential extraction.
//!
//! One pipeline serves both token kinds: scheme check, signature and expiry
//! check, blocklist lookup, then the kind check. Only the last step depends on
//! whether the endpoint wants an access or a refresh token.

use rocket::Request;
use rocket::State;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{
    Object, SecurityRequirement, SecurityScheme, SecuritySchemeData,
};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};

use crate::auth::jwt::{TokenKind, TokenPayload};
use crate::auth::{AuthError, AuthResult, AuthState};
use crate::error::{ApiError, guard_failure};

const BEARER_SCHEME: &str = "Bearer";

/// Token gate parameterised by the token kind an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BearerExtractor {
    expected: TokenKind,
}

impl BearerExtractor {
    pub const ACCESS: BearerExtractor = BearerExtractor {
        expected: TokenKind::Access,
    };
    pub const REFRESH: BearerExtractor = BearerExtractor {
        expected: TokenKind::Refresh,
    };

    pub fn expecting(expected: TokenKind) -> Self {
        Self { expected }
    }

    /// Run the full check against a raw `Authorization` header value.
    pub async fn extract(
        &self,
        header: Option<&str>,
        state: &AuthState,
    ) -> AuthResult<TokenPayload> {
        let token = credentials_from_header(header)?;

        let payload = state
            .issuer
            .codec()
            .decode(token)
            .ok_or(AuthError::InvalidToken)?;

        let lookup = state.revocations.contains(&payload.jti);
        let revoked = match tokio::time::timeout(state.config.revocation_timeout(), lookup).await {
            Ok(result) => result.map_err(|err| AuthError::RevocationUnavailable(err.to_string()))?,
            Err(_) => {
                return Err(AuthError::RevocationUnavailable(
                    "blocklist lookup timed out".into(),
                ));
            }
        };
        if revoked {
            log::debug!("rejected revoked token {}", payload.jti);
            return Err(AuthError::RevokedToken);
        }

        self.check_kind(&payload)?;
        Ok(payload)
    }

    pub fn check_kind(&self, payload: &TokenPayload) -> AuthResult<()> {
        match (self.expected, payload.kind()) {
            (TokenKind::Access, TokenKind::Refresh) => Err(AuthError::AccessTokenRequired),
            (TokenKind::Refresh, TokenKind::Access) => Err(AuthError::RefreshTokenRequired),
            _ => Ok(()),
        }
    }

    async fn extract_from(&self, request: &Request<'_>) -> Result<TokenPayload, ApiError> {
        let state = auth_state(request).await?;
        let header = request.headers().get_one("Authorization");
        Ok(self.extract(header, state).await?)
    }
}

/// Split `Bearer <token>`. The scheme must match exactly.
pub fn credentials_from_header(header: Option<&str>) -> AuthResult<&str> {
    let header = header.map(str::trim).unwrap_or_default();
    let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
    let token = token.trim();

    if scheme.is_empty() || token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    if scheme != BEARER_SCHEME {
        return Err(AuthError::InvalidScheme);
    }
    Ok(token)
}

pub(crate) async fn auth_state<'r>(request: &'r Request<'_>) -> Result<&'r AuthState, ApiError> {
    request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .map(|state| state.inner())
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()).into())
}

/// Payload of a verified, unrevoked access token.
#[derive(Debug, Clone)]
pub struct AccessToken(pub TokenPayload);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AccessToken {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match BearerExtractor::ACCESS.extract_from(request).await {
            Ok(payload) => Outcome::Success(AccessToken(payload)),
            Err(err) => guard_failure(request, err),
        }
    }
}

/// Payload of a verified, unrevoked refresh token.
#[derive(Debug, Clone)]
pub struct RefreshToken(pub TokenPayload);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RefreshToken {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match BearerExtractor::REFRESH.extract_from(request).await {
            Ok(payload) => Outcome::Success(RefreshToken(payload)),
            Err(err) => guard_failure(request, err),
        }
    }
}

/// OpenAPI description shared by every bearer-protected guard.
pub(crate) fn bearer_security_input() -> RequestHeaderInput {
    let scheme = SecurityScheme {
        description: Some("`Authorization: Bearer <token>`".to_owned()),
        data: SecuritySchemeData::Http {
            scheme: "bearer".to_owned(),
            bearer_format: Some("JWT".to_owned()),
        },
        extensions: Object::default(),
    };
    let mut requirement = SecurityRequirement::new();
    requirement.insert("BearerAuth".to_owned(), Vec::new());
    RequestHeaderInput::Security("BearerAuth".to_owned(), scheme, requirement)
}

impl<'r> OpenApiFromRequest<'r> for AccessToken {
    fn from_request_input(
        _generator: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security_input())
    }
}

impl<'r> OpenApiFromRequest<'r> for RefreshToken {
    fn from_request_input(
        _generator: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security_input())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::auth::jwt::Identity;
    use crate::test_support::test_auth_state;

    fn identity() -> Identity {
        Identity {
            user_id: 3,
            email: "member@example.com".into(),
            name: "Member".into(),
        }
    }

    #[test]
    fn header_must_use_exact_bearer_scheme() {
        assert_eq!(credentials_from_header(Some("Bearer abc")).unwrap(), "abc");
        assert!(matches!(
            credentials_from_header(Some("bearer abc")),
            Err(AuthError::InvalidScheme)
        ));
        assert!(matches!(
            credentials_from_header(Some("Basic dXNlcjpwYXNz")),
            Err(AuthError::InvalidScheme)
        ));
        assert!(matches!(
            credentials_from_header(None),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            credentials_from_header(Some("Bearer")),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            credentials_from_header(Some("Bearer   ")),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn accepts_matching_kind() {
        let state = test_auth_state();
        let access = state.issuer.issue_access(&identity()).expect("access");
        let header = format!("Bearer {}", access.token);

        let payload = BearerExtractor::ACCESS
            .extract(Some(&header), &state)
            .await
            .expect("valid access token");
        assert_eq!(payload.user, identity());
        assert!(!payload.refresh);
    }

    #[tokio::test]
    async fn rejects_mismatched_kind() {
        let state = test_auth_state();
        let access = state.issuer.issue_access(&identity()).expect("access");
        let refresh = state.issuer.issue_refresh(&identity()).expect("refresh");

        let err = BearerExtractor::ACCESS
            .extract(Some(&format!("Bearer {}", refresh.token)), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccessTokenRequired));

        let err = BearerExtractor::REFRESH
            .extract(Some(&format!("Bearer {}", access.token)), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RefreshTokenRequired));
    }

    #[tokio::test]
    async fn revoked_token_still_decodes_but_is_rejected() {
        let state = test_auth_state();
        let access = state.issuer.issue_access(&identity()).expect("access");
        state.revocations.add(&access.jti).await.expect("revoke");

        assert!(state.issuer.codec().decode(&access.token).is_some());
        let err = BearerExtractor::ACCESS
            .extract(Some(&format!("Bearer {}", access.token)), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RevokedToken));
    }

    #[tokio::test]
    async fn revocation_wins_over_kind_mismatch() {
        let state = test_auth_state();
        let refresh = state.issuer.issue_refresh(&identity()).expect("refresh");
        state.revocations.add(&refresh.jti).await.expect("revoke");

        let err = BearerExtractor::ACCESS
            .extract(Some(&format!("Bearer {}", refresh.token)), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RevokedToken));
    }

    #[tokio::test]
    async fn expired_and_garbage_tokens_are_invalid() {
        let state = test_auth_state();
        let expired = state
            .issuer
            .codec()
            .encode(&TokenPayload {
                user: identity(),
                exp: (Utc::now() - Duration::seconds(30)).timestamp(),
                jti: "expired".into(),
                refresh: false,
            })
            .expect("encode");

        for token in [expired.as_str(), "garbage"] {
            let err = BearerExtractor::ACCESS
                .extract(Some(&format!("Bearer {token}")), &state)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidToken));
        }
    }

    struct StalledStore;

    #[rocket::async_trait]
    impl crate::auth::RevocationStore for StalledStore {
        async fn add(&self, _jti: &str) -> AuthResult<()> {
            Ok(())
        }

        async fn contains(&self, _jti: &str) -> AuthResult<bool> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(false)
        }

        async fn purge_expired(&self) -> AuthResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn slow_blocklist_fails_closed() {
        let mut state = test_auth_state();
        state.config.revocation_timeout_ms = 20;
        state.revocations = Arc::new(StalledStore);
        let access = state.issuer.issue_access(&identity()).expect("access");

        let err = BearerExtractor::ACCESS
            .extract(Some(&format!("Bearer {}", access.token)), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RevocationUnavailable(_)));
    }
}
