//! Infrastructure layer: store, transactions, configuration and the shop operations.

pub mod config;
pub mod error;
pub mod shop;
pub mod store;
pub mod transaction;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, CredentialConfig, ShopConfig};
pub use error::{ShopError, ShopResult};
pub use shop::{CartView, OrderView, SavedItem, Shop};
pub use store::{InMemoryStore, Store, StoreError};
pub use transaction::Transaction;
