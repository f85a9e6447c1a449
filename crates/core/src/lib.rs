//! `shopping-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the user, catalog,
//! cart and order modules (no storage, no IO).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CartId, CartItemId, OrderId, OrderedItemId, ProductId, UserId};
pub use value_object::{Quantity, ValueObject};
