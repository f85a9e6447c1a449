use serde::{Deserialize, Serialize};

use shopping_core::{
    DomainError, DomainResult, Entity, OrderId, OrderedItemId, ProductId, Quantity, UserId,
};

use crate::cart::CartItem;

/// A finalized purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    is_canceled: bool,
}

impl Order {
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            is_canceled: false,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn is_canceled(&self) -> bool {
        self.is_canceled
    }

    /// Set the cancellation flag. Cancellation cannot be undone.
    pub fn cancel(&mut self) {
        self.is_canceled = true;
    }

    /// Ensure an update does not clear a cancellation that is already stored.
    pub fn ensure_update_allowed(&self, stored: &Order) -> DomainResult<()> {
        if self.user_id != stored.user_id {
            return Err(DomainError::validation("an order cannot change owner"));
        }
        if stored.is_canceled && !self.is_canceled {
            return Err(DomainError::invariant("a cancelled order cannot be reopened"));
        }
        Ok(())
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Order line. Holds a stock reservation of `quantity` units of `product_id`
/// until cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedItem {
    id: OrderedItemId,
    order_id: OrderId,
    product_id: ProductId,
    quantity: Quantity,
    is_canceled: bool,
}

impl OrderedItem {
    pub fn new(order_id: OrderId, product_id: ProductId, quantity: u64) -> Self {
        Self {
            id: OrderedItemId::new(),
            order_id,
            product_id,
            quantity: Quantity::new(quantity),
            is_canceled: false,
        }
    }

    pub fn from_cart_item(order_id: OrderId, item: &CartItem) -> Self {
        Self::new(order_id, item.product_id(), item.quantity().units())
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn set_quantity(&mut self, quantity: u64) {
        self.quantity = Quantity::new(quantity);
    }

    pub fn is_canceled(&self) -> bool {
        self.is_canceled
    }

    pub fn cancel(&mut self) {
        self.is_canceled = true;
    }

    /// Check that a re-save keeps the line attached to the same order and product.
    pub fn ensure_same_line(&self, stored: &OrderedItem) -> DomainResult<()> {
        if self.order_id != stored.order_id {
            return Err(DomainError::validation("an ordered item cannot move to another order"));
        }
        if self.product_id != stored.product_id {
            return Err(DomainError::validation("an ordered item cannot change product"));
        }
        if stored.is_canceled {
            return Err(DomainError::invariant("ordered item is cancelled"));
        }
        Ok(())
    }
}

impl Entity for OrderedItem {
    type Id = OrderedItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
