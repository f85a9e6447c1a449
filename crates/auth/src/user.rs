//! User account record and its credential lifecycle.
//!
//! A user is created with a plaintext password which must be sealed (salted and
//! hashed) before the record is stored. Sealing happens once: a user that already
//! carries a salt is never rehashed.

use serde::{Deserialize, Serialize};

use shopping_core::{DomainError, Entity, UserId};

use crate::credentials::{CredentialError, CredentialHasher};

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Plaintext password awaiting sealing. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainPassword(String);

impl PlainPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for PlainPassword {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PlainPassword(***)")
    }
}

/// Credential material of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Not yet salted; must not reach storage in this state.
    Plain(PlainPassword),
    /// Salted hash; the salt is fixed for the lifetime of the account.
    Sealed { password_hash: String, salt: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// Registration input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub password_confirmation: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// User account.
///
/// # Invariants
/// - Once sealed, the plaintext password is gone and the salt never changes.
/// - A soft-deleted user keeps its record but can no longer shop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    username: String,
    credentials: Credentials,
    token: Option<String>,
    is_admin: bool,
    is_deleted: bool,
}

impl User {
    /// Validate registration input and build an unsealed user.
    pub fn register(id: UserId, input: NewUser) -> Result<Self, DomainError> {
        let username = input.username.trim();
        if username.is_empty() {
            return Err(DomainError::validation("username cannot be empty"));
        }
        if username.chars().count() > 30 {
            return Err(DomainError::validation("username cannot exceed 30 characters"));
        }
        if input.password.is_empty() {
            return Err(DomainError::validation("password cannot be empty"));
        }
        if input.password != input.password_confirmation {
            return Err(DomainError::validation("passwords do not match"));
        }

        Ok(Self {
            id,
            username: username.to_string(),
            credentials: Credentials::Plain(PlainPassword::new(input.password)),
            token: None,
            is_admin: input.is_admin,
            is_deleted: false,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.credentials, Credentials::Sealed { .. })
    }

    pub fn salt(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Sealed { salt, .. } => Some(salt),
            Credentials::Plain(_) => None,
        }
    }

    pub fn password_hash(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Sealed { password_hash, .. } => Some(password_hash),
            Credentials::Plain(_) => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
        self.token = None;
    }

    /// Salt and hash the plaintext password, discarding it.
    ///
    /// Returns `Ok(false)` without touching anything if the user is already sealed.
    /// On hashing failure the user is left unchanged.
    pub fn seal_credentials(
        &mut self,
        hasher: &dyn CredentialHasher,
    ) -> Result<bool, CredentialError> {
        let Credentials::Plain(password) = &self.credentials else {
            return Ok(false);
        };

        let salt = hasher.generate_salt();
        let password_hash = hasher.hash(password.expose(), &salt)?;
        self.credentials = Credentials::Sealed {
            password_hash,
            salt,
        };

        tracing::debug!(user_id = %self.id, "credentials sealed");
        Ok(true)
    }

    /// Check a plaintext password against the sealed credentials.
    pub fn verify_password(
        &self,
        password: &str,
        hasher: &dyn CredentialHasher,
    ) -> Result<bool, CredentialError> {
        match &self.credentials {
            Credentials::Sealed {
                password_hash,
                salt,
            } => Ok(hasher.verify(password, salt, password_hash)),
            Credentials::Plain(_) => Err(CredentialError::NotSealed),
        }
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
