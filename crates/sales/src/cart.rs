use serde::{Deserialize, Serialize};

use shopping_core::{CartId, CartItemId, DomainResult, Entity, ProductId, Quantity, UserId};

/// A user's in-progress selection. At most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    id: CartId,
    user_id: UserId,
}

impl Cart {
    pub fn open(user_id: UserId) -> Self {
        Self {
            id: CartId::new(),
            user_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Entity for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Cart line: product + quantity (always positive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    id: CartItemId,
    cart_id: CartId,
    product_id: ProductId,
    quantity: Quantity,
}

impl CartItem {
    pub fn new(cart_id: CartId, product_id: ProductId, quantity: u64) -> DomainResult<Self> {
        Ok(Self {
            id: CartItemId::new(),
            cart_id,
            product_id,
            quantity: Quantity::positive(quantity)?,
        })
    }

    pub fn cart_id(&self) -> CartId {
        self.cart_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Merge more units of the same product into this line.
    pub fn add(&mut self, quantity: u64) -> DomainResult<()> {
        self.quantity = self.quantity.checked_add(Quantity::positive(quantity)?)?;
        Ok(())
    }
}

impl Entity for CartItem {
    type Id = CartItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
