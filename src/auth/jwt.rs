use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthConfig, AuthResult};

/// Minimal identity embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Identity {
    pub user_id: i32,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn is_refresh(self) -> bool {
        matches!(self, TokenKind::Refresh)
    }
}

/// Signed claim set: `{user, exp, jti, refresh}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub user: Identity,
    pub exp: i64,
    pub jti: String,
    pub refresh: bool,
}

impl TokenPayload {
    pub fn kind(&self) -> TokenKind {
        if self.refresh {
            TokenKind::Refresh
        } else {
            TokenKind::Access
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Encodes and verifies signed tokens with one symmetric key.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    validation: Validation,
}

impl TokenCodec {
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret_bytes = config.jwt_secret.as_bytes();
        let encoding_key = EncodingKey::from_secret(secret_bytes);
        let decoding_key = DecodingKey::from_secret(secret_bytes);

        let mut validation = Validation::new(config.jwt_algorithm);
        validation.leeway = config.jwt_leeway_secs;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key,
            decoding_key,
            algorithm: config.jwt_algorithm,
            validation,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encode(&self, payload: &TokenPayload) -> AuthResult<String> {
        let header = Header::new(self.algorithm);
        Ok(encode(&header, payload, &self.encoding_key)?)
    }

    /// Verify signature, structure and expiry.
    ///
    /// Every verification failure collapses to `None`; callers treat that as
    /// an invalid token rather than a fault.
    pub fn decode(&self, token: &str) -> Option<TokenPayload> {
        match decode::<TokenPayload>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                log::debug!("token rejected: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::auth::config::RevocationBackend;

    fn make_test_config(secret: &str) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.into(),
            jwt_algorithm: Algorithm::HS256,
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 172_800,
            jwt_leeway_secs: 0,
            revocation_backend: RevocationBackend::Memory,
            revocation_timeout_ms: 500,
            revocation_purge_secs: 3600,
        }
    }

    fn payload(exp: DateTime<Utc>, refresh: bool) -> TokenPayload {
        TokenPayload {
            user: Identity {
                user_id: 42,
                email: "reader@example.com".into(),
                name: "Reader".into(),
            },
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
            refresh,
        }
    }

    #[test]
    fn decodes_what_it_encodes() {
        let codec = TokenCodec::from_config(&make_test_config("codec-secret"));

        for refresh in [false, true] {
            let original = payload(Utc::now() + Duration::minutes(5), refresh);
            let token = codec.encode(&original).expect("encode");
            assert_eq!(codec.decode(&token), Some(original));
        }
    }

    #[test]
    fn expired_tokens_do_not_decode() {
        let codec = TokenCodec::from_config(&make_test_config("codec-secret"));
        let token = codec
            .encode(&payload(Utc::now() - Duration::seconds(10), false))
            .expect("encode");

        assert!(codec.decode(&token).is_none());
    }

    #[test]
    fn foreign_signatures_and_garbage_do_not_decode() {
        let ours = TokenCodec::from_config(&make_test_config("codec-secret"));
        let theirs = TokenCodec::from_config(&make_test_config("someone-else"));
        let token = theirs
            .encode(&payload(Utc::now() + Duration::minutes(5), false))
            .expect("encode");

        assert!(ours.decode(&token).is_none());
        assert!(ours.decode("not.a.token").is_none());
        assert!(ours.decode("").is_none());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let codec = TokenCodec::from_config(&make_test_config("codec-secret"));
        let access = codec
            .encode(&payload(Utc::now() + Duration::minutes(5), false))
            .expect("encode");
        let refresh = codec
            .encode(&payload(Utc::now() + Duration::minutes(5), true))
            .expect("encode");

        // Splice the refresh claims onto the access signature.
        let access_parts: Vec<&str> = access.split('.').collect();
        let refresh_parts: Vec<&str> = refresh.split('.').collect();
        let forged = format!(
            "{}.{}.{}",
            access_parts[0], refresh_parts[1], access_parts[2]
        );

        assert!(codec.decode(&forged).is_none());
    }
}
