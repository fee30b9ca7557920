use argon2::{
    Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::RngCore;

use crate::auth::{AuthError, AuthResult};

const SALT_LEN: usize = 16;

#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn new() -> AuthResult<Self> {
        Self::with_params(19 * 1024, 2, 1) // 19 MiB
    }

    /// Argon2id with explicit cost parameters. Verification always uses the
    /// parameters recorded in the stored hash.
    pub fn with_params(m_cost_kib: u32, t_cost: u32, p_cost: u32) -> AuthResult<Self> {
        let mut builder = ParamsBuilder::new();
        builder.m_cost(m_cost_kib);
        builder.t_cost(t_cost);
        builder.p_cost(p_cost);
        let params = builder.build().map_err(AuthError::from)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Ok(Self { argon2 })
    }

    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes).map_err(AuthError::from)?;
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(AuthError::from)?
            .to_string();
        Ok(hash)
    }

    /// `Ok(false)` on mismatch; `MalformedHash` only when the stored value
    /// is not a PHC hash string at all.
    pub fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let parsed =
            PasswordHash::new(encoded).map_err(|err| AuthError::MalformedHash(err.to_string()))?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AuthError::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_service() -> PasswordService {
        PasswordService::with_params(1024, 1, 1).expect("password service")
    }

    #[test]
    fn hashes_and_verifies_passwords() {
        let service = fast_service();
        let hash = service
            .hash_password("super-secret")
            .expect("hash generation");
        assert!(
            service
                .verify_password("super-secret", &hash)
                .expect("verify succeeds")
        );
        assert!(
            !service
                .verify_password("wrong-password", &hash)
                .expect("verify runs")
        );
    }

    #[test]
    fn each_hash_uses_a_fresh_salt() {
        let service = fast_service();
        let first = service.hash_password("same").expect("hash");
        let second = service.hash_password("same").expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn empty_password_is_allowed() {
        let service = fast_service();
        let hash = service.hash_password("").expect("hash");
        assert!(service.verify_password("", &hash).expect("verify"));
        assert!(!service.verify_password("x", &hash).expect("verify"));
    }

    #[test]
    fn corrupt_hash_is_reported() {
        let service = fast_service();
        let err = service
            .verify_password("anything", "definitely-not-a-hash")
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedHash(_)));
    }

    #[test]
    fn hashes_from_other_cost_settings_still_verify() {
        let strong = PasswordService::new().expect("default service");
        let hash = strong.hash_password("portable").expect("hash");
        assert!(fast_service().verify_password("portable", &hash).expect("verify"));
    }
}
