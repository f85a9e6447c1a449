use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopping_core::{Aggregate, AggregateRoot, DomainError, OrderedItemId, ProductId, Quantity};
use shopping_events::Event;

/// Stream type under which product ledgers are stored.
pub const PRODUCT_STREAM_TYPE: &str = "inventory.product";

/// Aggregate root: Product, rehydrated from its stock ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    stock: u64,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            stock: 0,
            version: 0,
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units currently available for reservation.
    pub fn stock(&self) -> u64 {
        self.stock
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub name: String,
    pub initial_stock: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveStock (restock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock for an ordered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub ordered_item_id: OrderedItemId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock previously reserved by an ordered item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub product_id: ProductId,
    pub ordered_item_id: OrderedItemId,
    pub quantity: Quantity,
    pub reason: ReleaseReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ReceiveStock(ReceiveStock),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
}

/// Why reserved stock went back on the shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The ordered item's quantity was lowered (or set to zero).
    Adjusted,
    /// The owning order was cancelled.
    Cancelled,
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub product_id: ProductId,
    pub ordered_item_id: OrderedItemId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub product_id: ProductId,
    pub ordered_item_id: OrderedItemId,
    pub quantity: Quantity,
    pub reason: ReleaseReason,
    pub occurred_at: DateTime<Utc>,
}

/// A stock ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    ProductCreated(ProductCreated),
    StockReceived(StockReceived),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
}

impl StockEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            StockEvent::ProductCreated(e) => e.product_id,
            StockEvent::StockReceived(e) => e.product_id,
            StockEvent::StockReserved(e) => e.product_id,
            StockEvent::StockReleased(e) => e.product_id,
        }
    }

    /// Signed effect of this entry on available stock.
    pub fn stock_delta(&self) -> i128 {
        match self {
            StockEvent::ProductCreated(_) => 0,
            StockEvent::StockReceived(e) => i128::from(e.quantity.units()),
            StockEvent::StockReserved(e) => -i128::from(e.quantity.units()),
            StockEvent::StockReleased(e) => i128::from(e.quantity.units()),
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::ProductCreated(_) => "inventory.product.created",
            StockEvent::StockReceived(_) => "inventory.stock.received",
            StockEvent::StockReserved(_) => "inventory.stock.reserved",
            StockEvent::StockReleased(_) => "inventory.stock.released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::ProductCreated(e) => e.occurred_at,
            StockEvent::StockReceived(e) => e.occurred_at,
            StockEvent::StockReserved(e) => e.occurred_at,
            StockEvent::StockReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.stock = 0;
                self.created = true;
            }
            StockEvent::StockReceived(e) => {
                self.stock = self.stock.saturating_add(e.quantity.units());
            }
            StockEvent::StockReserved(e) => {
                // `handle` never decides a reservation larger than the stock.
                self.stock = self.stock.saturating_sub(e.quantity.units());
            }
            StockEvent::StockReleased(e) => {
                self.stock = self.stock.saturating_add(e.quantity.units());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            ProductCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            ProductCommand::ReleaseStock(cmd) => self.handle_release(cmd),
        }
    }
}

impl Product {
    fn ensure_exists(&self, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("product", product_id));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let mut events = vec![StockEvent::ProductCreated(ProductCreated {
            product_id: cmd.product_id,
            name: cmd.name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })];
        if !cmd.initial_stock.is_zero() {
            events.push(StockEvent::StockReceived(StockReceived {
                product_id: cmd.product_id,
                quantity: cmd.initial_stock,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.quantity.is_zero() {
            return Err(DomainError::validation("quantity must be greater than zero"));
        }
        if self.stock.checked_add(cmd.quantity.units()).is_none() {
            return Err(DomainError::invariant("stock overflow"));
        }

        Ok(vec![StockEvent::StockReceived(StockReceived {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.quantity.is_zero() {
            return Err(DomainError::validation("quantity must be greater than zero"));
        }
        if cmd.quantity.units() > self.stock {
            return Err(DomainError::insufficient_stock(
                cmd.product_id,
                self.stock,
                cmd.quantity.units(),
            ));
        }

        Ok(vec![StockEvent::StockReserved(StockReserved {
            product_id: cmd.product_id,
            ordered_item_id: cmd.ordered_item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.product_id)?;
        if cmd.quantity.is_zero() {
            return Err(DomainError::validation("quantity must be greater than zero"));
        }
        if self.stock.checked_add(cmd.quantity.units()).is_none() {
            return Err(DomainError::invariant("stock overflow"));
        }

        Ok(vec![StockEvent::StockReleased(StockReleased {
            product_id: cmd.product_id,
            ordered_item_id: cmd.ordered_item_id,
            quantity: cmd.quantity,
            reason: cmd.reason,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn created(stock: u64) -> Product {
        let product_id = ProductId::new();
        let mut product = Product::empty(product_id);
        let cmd = ProductCommand::CreateProduct(CreateProduct {
            product_id,
            name: "Espresso beans".to_string(),
            initial_stock: Quantity::new(stock),
            occurred_at: now(),
        });
        for event in product.handle(&cmd).unwrap() {
            product.apply(&event);
        }
        product
    }

    fn reserve(product: &Product, units: u64) -> ProductCommand {
        ProductCommand::ReserveStock(ReserveStock {
            product_id: *product.id(),
            ordered_item_id: OrderedItemId::new(),
            quantity: Quantity::new(units),
            occurred_at: now(),
        })
    }

    #[test]
    fn create_with_initial_stock_emits_two_entries() {
        let product = created(10);
        assert!(product.exists());
        assert_eq!(product.stock(), 10);
        assert_eq!(product.version(), 2);
        assert_eq!(product.name(), "Espresso beans");
    }

    #[test]
    fn create_without_stock_emits_only_created() {
        let product = created(0);
        assert_eq!(product.stock(), 0);
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn create_twice_is_a_conflict() {
        let product = created(1);
        let cmd = ProductCommand::CreateProduct(CreateProduct {
            product_id: *product.id(),
            name: "again".to_string(),
            initial_stock: Quantity::ZERO,
            occurred_at: now(),
        });
        assert!(matches!(product.handle(&cmd), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn reserve_within_stock_decrements() {
        let mut product = created(5);
        let events = product.handle(&reserve(&product, 3)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stock_delta(), -3);
        product.apply(&events[0]);
        assert_eq!(product.stock(), 2);
    }

    #[test]
    fn reserve_beyond_stock_is_rejected() {
        let product = created(2);
        let err = product.handle(&reserve(&product, 3)).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(product.id(), 2, 3));
    }

    #[test]
    fn reserve_on_missing_product_is_not_found() {
        let product = Product::empty(ProductId::new());
        let err = product.handle(&reserve(&product, 1)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn release_adds_stock_back() {
        let mut product = created(1);
        let cmd = ProductCommand::ReleaseStock(ReleaseStock {
            product_id: *product.id(),
            ordered_item_id: OrderedItemId::new(),
            quantity: Quantity::new(4),
            reason: ReleaseReason::Cancelled,
            occurred_at: now(),
        });
        for event in product.handle(&cmd).unwrap() {
            product.apply(&event);
        }
        assert_eq!(product.stock(), 5);
    }

    #[test]
    fn zero_quantity_movements_are_rejected() {
        let product = created(1);
        assert!(product.handle(&reserve(&product, 0)).is_err());
        let receive = ProductCommand::ReceiveStock(ReceiveStock {
            product_id: *product.id(),
            quantity: Quantity::ZERO,
            occurred_at: now(),
        });
        assert!(product.handle(&receive).is_err());
    }

    #[test]
    fn event_types_are_stable() {
        let e = StockEvent::StockReserved(StockReserved {
            product_id: ProductId::new(),
            ordered_item_id: OrderedItemId::new(),
            quantity: Quantity::new(1),
            occurred_at: now(),
        });
        assert_eq!(e.event_type(), "inventory.stock.reserved");
        assert_eq!(Event::version(&e), 1);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: applying any accepted sequence of reservations never drives
            /// stock below zero, and stock always equals the sum of ledger deltas.
            #[test]
            fn stock_equals_sum_of_ledger_deltas(
                initial in 0u64..100,
                requests in proptest::collection::vec(1u64..30, 0..20)
            ) {
                let mut product = created(initial);
                let mut total: i128 = i128::from(initial);

                for units in requests {
                    match product.handle(&reserve(&product, units)) {
                        Ok(events) => {
                            for event in &events {
                                total += event.stock_delta();
                                product.apply(event);
                            }
                        }
                        Err(DomainError::InsufficientStock { available, .. }) => {
                            prop_assert_eq!(available, product.stock());
                        }
                        Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                    }
                    prop_assert!(total >= 0);
                    prop_assert_eq!(i128::from(product.stock()), total);
                }
            }
        }
    }
}
