//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Users, carts, cart items, orders and ordered items are plain entities: they are
/// stored as rows and compared by identifier, not by value.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
