//! `shopping-auth` — user accounts and credential sealing.
//!
//! This crate is intentionally decoupled from storage: it decides what a user
//! record looks like before it is persisted, nothing more.

pub mod credentials;
pub mod user;

pub use credentials::{
    Argon2Hasher, CredentialError, CredentialHasher, HashingParams, MAX_SALT_LENGTH,
    MIN_SALT_LENGTH,
};
pub use user::{Credentials, NewUser, PlainPassword, User};
