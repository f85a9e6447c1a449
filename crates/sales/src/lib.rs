//! Sales domain module: carts and orders.
//!
//! Records here are plain entities; the rules that tie them to stock live in
//! the transactional operations of `shopping-infra`.

pub mod cart;
pub mod order;

pub use cart::{Cart, CartItem};
pub use order::{Order, OrderedItem};
