//! Value object trait: equality by value, not identity.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values; to "modify"
/// one, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// A count of product units (cart lines, order lines, stock movements).
///
/// Zero is a legal quantity: saving an ordered item with zero units removes it.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(u64);

impl ValueObject for Quantity {}

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn new(units: u64) -> Self {
        Self(units)
    }

    /// Build a quantity that must be strictly positive (cart lines, restocks).
    pub fn positive(units: u64) -> DomainResult<Self> {
        if units == 0 {
            return Err(DomainError::validation("quantity must be greater than zero"));
        }
        Ok(Self(units))
    }

    pub fn units(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Quantity) -> DomainResult<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| DomainError::validation("quantity overflow"))
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
