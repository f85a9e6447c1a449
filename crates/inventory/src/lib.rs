//! Inventory domain module (ledger-backed).
//!
//! A product's stock is the fold of its append-only ledger. This crate holds
//! the business rules for that ledger, implemented purely as deterministic
//! domain logic (no IO, no storage).

pub mod product;
pub mod reservation;

pub use product::{
    CreateProduct, Product, ProductCommand, ProductCreated, ReceiveStock, ReleaseReason,
    ReleaseStock, ReserveStock, StockEvent, StockReceived, StockReleased, StockReserved,
    PRODUCT_STREAM_TYPE,
};
pub use reservation::{StockMovement, plan};
