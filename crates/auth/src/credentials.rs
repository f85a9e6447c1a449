//! Salt generation and salted password hashing.
//!
//! Hashes are Argon2id PHC strings computed with the user's own salt (its bytes,
//! B64-encoded into the PHC salt field), so the same `(password, salt)` pair always
//! yields the same hash and the salt can be checked against the one embedded in it.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest salt accepted by the hasher.
pub const MIN_SALT_LENGTH: usize = 8;

/// Longest salt accepted by the hasher (48 bytes encode to the 64-char PHC salt limit).
pub const MAX_SALT_LENGTH: usize = 48;

/// Credential sealing/hashing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("invalid salt: {0}")]
    InvalidSalt(String),

    #[error("invalid hashing parameters: {0}")]
    InvalidParams(String),

    #[error("credentials have not been sealed yet")]
    NotSealed,
}

/// Password hashing collaborator.
///
/// Implementations must be deterministic in `hash` for a given `(password, salt)`.
pub trait CredentialHasher: Send + Sync {
    /// Generate a fresh random salt string.
    fn generate_salt(&self) -> String;

    /// Compute the salted hash of `password`.
    fn hash(&self, password: &str, salt: &str) -> Result<String, CredentialError>;

    /// Check `password` against a stored `(salt, hash)` pair.
    ///
    /// Returns `false` for a wrong password, a salt that is not the one the hash was
    /// built with, or a malformed hash.
    fn verify(&self, password: &str, salt: &str, hash: &str) -> bool;
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Argon2id-backed [`CredentialHasher`].
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    salt_length: usize,
    params: Params,
}

impl Argon2Hasher {
    pub fn new(salt_length: usize, params: HashingParams) -> Result<Self, CredentialError> {
        if !(MIN_SALT_LENGTH..=MAX_SALT_LENGTH).contains(&salt_length) {
            return Err(CredentialError::InvalidSalt(format!(
                "salt length must be within {MIN_SALT_LENGTH}..={MAX_SALT_LENGTH}, \
                 got {salt_length}"
            )));
        }

        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| CredentialError::InvalidParams(e.to_string()))?;

        Ok(Self {
            salt_length,
            params,
        })
    }

    pub fn salt_length(&self) -> usize {
        self.salt_length
    }

    /// The PHC salt field for a stored salt string.
    fn phc_salt(salt: &str) -> Result<SaltString, CredentialError> {
        if !(MIN_SALT_LENGTH..=MAX_SALT_LENGTH).contains(&salt.len()) {
            return Err(CredentialError::InvalidSalt(format!(
                "salt must be {MIN_SALT_LENGTH}..={MAX_SALT_LENGTH} bytes, got {}",
                salt.len()
            )));
        }
        SaltString::encode_b64(salt.as_bytes())
            .map_err(|e| CredentialError::InvalidSalt(e.to_string()))
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            salt_length: 16,
            params: Params::default(),
        }
    }
}

impl CredentialHasher for Argon2Hasher {
    fn generate_salt(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.salt_length)
            .map(char::from)
            .collect()
    }

    fn hash(&self, password: &str, salt: &str) -> Result<String, CredentialError> {
        let salt = Self::phc_salt(salt)?;

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hashing(e.to_string()))
    }

    fn verify(&self, password: &str, salt: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        let Ok(expected) = Self::phc_salt(salt) else {
            return false;
        };
        if parsed.salt.map(|s| s.as_str()) != Some(expected.as_str()) {
            return false;
        }

        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}
