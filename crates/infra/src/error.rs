//! Errors surfaced by shop operations.

use thiserror::Error;

use shopping_auth::CredentialError;
use shopping_core::DomainError;

use crate::config::ConfigError;
use crate::store::StoreError;

pub type ShopResult<T> = Result<T, ShopError>;

/// Failure of a shop operation. Whatever the variant, nothing was committed.
#[derive(Debug, Error)]
pub enum ShopError {
    /// Business rule failure (validation, missing record, insufficient stock).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Credential sealing failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Another transaction committed first, or a unique constraint was hit.
    /// Resubmitting the operation may succeed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store failed or holds corrupt data.
    #[error("store error: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<StoreError> for ShopError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => ShopError::Conflict(msg),
            StoreError::UniqueViolation(msg) => ShopError::Conflict(msg),
            other => ShopError::Store(other),
        }
    }
}

impl ShopError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ShopError::Domain(e) if e.is_not_found())
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, ShopError::Domain(DomainError::InsufficientStock { .. }))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ShopError::Conflict(_) | ShopError::Domain(DomainError::Conflict(_))
        )
    }
}
