use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::jwt::{Identity, TokenCodec, TokenKind, TokenPayload};
use crate::auth::{AuthConfig, AuthError, AuthResult};

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JwtMetadata {
    pub algorithm: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}

/// Mints access and refresh tokens, each with a fresh `jti`.
pub struct TokenIssuer {
    codec: TokenCodec,
    access_token_ttl_secs: i64,
    refresh_token_ttl_secs: i64,
}

impl TokenIssuer {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            codec: TokenCodec::from_config(config),
            access_token_ttl_secs: config.access_token_ttl_secs,
            refresh_token_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn issue_access(&self, identity: &Identity) -> AuthResult<IssuedToken> {
        self.issue(identity, TokenKind::Access)
    }

    pub fn issue_refresh(&self, identity: &Identity) -> AuthResult<IssuedToken> {
        self.issue(identity, TokenKind::Refresh)
    }

    pub fn issue(&self, identity: &Identity, kind: TokenKind) -> AuthResult<IssuedToken> {
        let ttl_secs = match kind {
            TokenKind::Access => self.access_token_ttl_secs,
            TokenKind::Refresh => self.refresh_token_ttl_secs,
        };
        let expires_at = Duration::try_seconds(ttl_secs)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                AuthError::Config(format!(
                    "{kind:?} token lifetime of {ttl_secs}s overflows the expiry timestamp"
                ))
            })?;
        let jti = Uuid::new_v4().to_string();

        let payload = TokenPayload {
            user: identity.clone(),
            exp: expires_at.timestamp(),
            jti: jti.clone(),
            refresh: kind.is_refresh(),
        };
        let token = self.codec.encode(&payload)?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    pub fn metadata(&self) -> JwtMetadata {
        JwtMetadata {
            algorithm: format!("{:?}", self.codec.algorithm()),
            access_token_ttl_secs: self.access_token_ttl_secs,
            refresh_token_ttl_secs: self.refresh_token_ttl_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::Algorithm;

    use super::*;
    use crate::auth::config::RevocationBackend;

    fn make_issuer() -> TokenIssuer {
        issuer_with_access_ttl(900)
    }

    fn issuer_with_access_ttl(access_token_ttl_secs: i64) -> TokenIssuer {
        TokenIssuer::from_config(&AuthConfig {
            jwt_secret: "issuer-secret".into(),
            jwt_algorithm: Algorithm::HS256,
            access_token_ttl_secs,
            refresh_token_ttl_secs: 2 * 24 * 60 * 60,
            jwt_leeway_secs: 0,
            revocation_backend: RevocationBackend::Memory,
            revocation_timeout_ms: 500,
            revocation_purge_secs: 3600,
        })
    }

    fn identity() -> Identity {
        Identity {
            user_id: 7,
            email: "librarian@example.com".into(),
            name: "Librarian".into(),
        }
    }

    #[test]
    fn access_and_refresh_tokens_carry_their_kind() {
        let issuer = make_issuer();

        let access = issuer.issue_access(&identity()).expect("access");
        let refresh = issuer.issue_refresh(&identity()).expect("refresh");

        let access_claims = issuer.codec().decode(&access.token).expect("decode access");
        let refresh_claims = issuer
            .codec()
            .decode(&refresh.token)
            .expect("decode refresh");

        assert_eq!(access_claims.kind(), TokenKind::Access);
        assert_eq!(refresh_claims.kind(), TokenKind::Refresh);
        assert_eq!(access_claims.user, identity());
        assert_eq!(access_claims.jti, access.jti);
    }

    #[test]
    fn refresh_tokens_live_two_days() {
        let issuer = make_issuer();
        let before = Utc::now();
        let refresh = issuer.issue_refresh(&identity()).expect("refresh");
        let lifetime = refresh.expires_at - before;

        assert!(lifetime >= Duration::days(2));
        assert!(lifetime < Duration::days(2) + Duration::seconds(5));
    }

    #[test]
    fn every_issuance_gets_a_new_jti() {
        let issuer = make_issuer();
        let first = issuer.issue_access(&identity()).expect("first");
        let second = issuer.issue_access(&identity()).expect("second");

        assert_ne!(first.jti, second.jti);
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn metadata_reports_algorithm_and_lifetimes() {
        let meta = make_issuer().metadata();
        assert_eq!(meta.algorithm, "HS256");
        assert_eq!(meta.access_token_ttl_secs, 900);
        assert_eq!(meta.refresh_token_ttl_secs, 172_800);
    }

    #[test]
    fn unrepresentable_lifetime_is_an_error_not_a_panic() {
        for ttl in [10_000_000_000_000, i64::MAX] {
            let issuer = issuer_with_access_ttl(ttl);
            let err = issuer.issue_access(&identity()).unwrap_err();
            assert!(matches!(err, AuthError::Config(_)), "ttl {ttl}: {err}");

            assert_eq!(issuer.metadata().access_token_ttl_secs, ttl);
            issuer.issue_refresh(&identity()).expect("refresh still issues");
        }
    }
}
