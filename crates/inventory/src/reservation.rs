//! Reservation-on-write planning.
//!
//! An ordered item holds a reservation against its product. Saving the item with a
//! new quantity moves only the difference between what it already holds and what it
//! now asks for:
//!
//! ```text
//! new_stock = available + prior - requested      (must stay >= 0)
//! ```

use chrono::{DateTime, Utc};

use shopping_core::{DomainError, DomainResult, OrderedItemId, ProductId, Quantity};

use crate::product::{ProductCommand, ReleaseReason, ReleaseStock, ReserveStock};

/// Net stock movement required by a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockMovement {
    /// The item keeps the quantity it already holds.
    None,
    /// Take more units out of stock.
    Reserve(Quantity),
    /// Put units back into stock.
    Release(Quantity),
}

impl StockMovement {
    /// Stock level after applying this movement to `available`.
    pub fn apply_to(self, available: u64) -> u64 {
        match self {
            StockMovement::None => available,
            StockMovement::Reserve(q) => available.saturating_sub(q.units()),
            StockMovement::Release(q) => available.saturating_add(q.units()),
        }
    }

    /// Ledger command for this movement, if any.
    pub fn into_command(
        self,
        product_id: ProductId,
        ordered_item_id: OrderedItemId,
        reason: ReleaseReason,
        occurred_at: DateTime<Utc>,
    ) -> Option<ProductCommand> {
        match self {
            StockMovement::None => None,
            StockMovement::Reserve(quantity) => Some(ProductCommand::ReserveStock(ReserveStock {
                product_id,
                ordered_item_id,
                quantity,
                occurred_at,
            })),
            StockMovement::Release(quantity) => Some(ProductCommand::ReleaseStock(ReleaseStock {
                product_id,
                ordered_item_id,
                quantity,
                reason,
                occurred_at,
            })),
        }
    }
}

/// Decide the stock movement for saving an ordered item.
///
/// `prior` is the quantity the item already reserves (zero on first save).
/// Fails with `InsufficientStock` when `available + prior < requested`.
pub fn plan(
    product_id: ProductId,
    available: u64,
    prior: Quantity,
    requested: Quantity,
) -> DomainResult<StockMovement> {
    let new_stock =
        i128::from(available) + i128::from(prior.units()) - i128::from(requested.units());
    if new_stock < 0 {
        return Err(DomainError::insufficient_stock(
            product_id,
            available.saturating_add(prior.units()),
            requested.units(),
        ));
    }

    let movement = match requested.cmp(&prior) {
        core::cmp::Ordering::Equal => StockMovement::None,
        core::cmp::Ordering::Greater => {
            StockMovement::Reserve(Quantity::new(requested.units() - prior.units()))
        }
        core::cmp::Ordering::Less => {
            StockMovement::Release(Quantity::new(prior.units() - requested.units()))
        }
    };
    Ok(movement)
}
