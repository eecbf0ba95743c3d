//! Local credential check for the `Password` provider.
//!
//! Hashes are Argon2id in PHC string form (`$argon2id$v=19$m=...`), salted per
//! hash, with tunable memory/time cost. The stored hash lives in the
//! profile's provider data under [`PASSWORD_HASH_KEY`].

use super::ports::{AuthError, UserProfile};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::OnceLock;

/// Key of the hash inside a password profile's provider data.
pub const PASSWORD_HASH_KEY: &str = "password";

pub const USERNAME_LENGTH: std::ops::RangeInclusive<usize> = 5..=64;
pub const PASSWORD_LENGTH: std::ops::RangeInclusive<usize> = 6..=64;

#[derive(Debug, Clone)]
pub struct PasswordAuthenticator {
    params: Params,
}

impl Default for PasswordAuthenticator {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordAuthenticator {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Config(format!("Failed to hash password: {e}")))
    }

    /// Check a candidate against a stored hash. A malformed hash never matches.
    ///
    /// Verification uses the parameters recorded in the hash itself, so hashes
    /// made with an older work factor keep verifying.
    pub fn verify(&self, stored_hash: &str, candidate: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(candidate.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Burn the same work as a real verification, for unknown users.
    pub fn verify_dummy(&self, candidate: &str) {
        static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
        let dummy = DUMMY_HASH.get_or_init(|| self.hash("dummy-password-for-timing").ok());
        if let Some(hash) = dummy {
            let _ = self.verify(hash, candidate);
        }
    }
}

/// Whether a submitted username/password pair is worth checking at all.
pub fn credentials_well_formed(username: &str, password: &str) -> bool {
    USERNAME_LENGTH.contains(&username.chars().count())
        && PASSWORD_LENGTH.contains(&password.chars().count())
}

/// Copy of `profile` without the stored password hash, for handing to
/// anything outside the credential check.
pub fn without_password_hash(profile: &UserProfile) -> UserProfile {
    let mut profile = profile.clone();
    if let Some(data) = profile.provider_data.as_object_mut() {
        data.remove(PASSWORD_HASH_KEY);
    }
    profile
}
