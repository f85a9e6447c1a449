//! Integration tests for the shop operations.
//!
//! Tests: Shop → Transaction → InMemoryStore (records + stock ledgers)
//!
//! Verifies:
//! - Credentials are sealed once and verify only the original password
//! - Orders consume carts and reserve stock atomically
//! - Saving and cancelling ordered items moves stock by exactly the right amount
//! - Optimistic concurrency conflicts are detected

use std::sync::Arc;

use proptest::prelude::*;

use shopping_auth::{
    Argon2Hasher, CredentialError, CredentialHasher, HashingParams, NewUser, User,
};
use shopping_core::{AggregateRoot, DomainError, Entity, OrderId, ProductId, UserId};
use shopping_events::Event;
use shopping_inventory::{ReleaseReason, StockEvent};
use shopping_sales::{Cart, Order, OrderedItem};

use crate::config::{
    ConfigError, ENV_HASH_ITERATIONS, ENV_HASH_MEMORY_KIB, ENV_HASH_PARALLELISM,
    ENV_LOG_FORMAT, ENV_SALT_LENGTH, ShopConfig,
};
use crate::error::ShopError;
use crate::shop::{SavedItem, Shop};
use crate::store::InMemoryStore;
use crate::transaction::Transaction;

fn fast_params() -> HashingParams {
    HashingParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}

fn shop() -> Shop<InMemoryStore> {
    let hasher = Argon2Hasher::new(16, fast_params()).unwrap();
    Shop::new(InMemoryStore::new(), Arc::new(hasher))
}

fn new_user(username: &str, password: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        password: password.to_string(),
        password_confirmation: password.to_string(),
        is_admin: false,
    }
}

fn register(shop: &Shop<InMemoryStore>, username: &str) -> UserId {
    *shop
        .register_user(new_user(username, "hunter22"))
        .unwrap()
        .id()
}

fn product(shop: &Shop<InMemoryStore>, name: &str, stock: u64) -> ProductId {
    *shop.create_product(name, stock).unwrap().id()
}

/// Insert an order with no items directly through a transaction.
fn empty_order(shop: &Shop<InMemoryStore>) -> OrderId {
    let order = Order::new(UserId::new());
    let mut tx = Transaction::begin(shop.store());
    tx.put(order.clone()).unwrap();
    tx.commit().unwrap();
    *order.id()
}

fn stock(shop: &Shop<InMemoryStore>, product_id: ProductId) -> u64 {
    shop.stock(product_id).unwrap()
}

/// Hasher whose hash step always fails.
struct FailingHasher;

impl CredentialHasher for FailingHasher {
    fn generate_salt(&self) -> String {
        "abcdefghijkl".to_string()
    }

    fn hash(&self, _password: &str, _salt: &str) -> Result<String, CredentialError> {
        Err(CredentialError::Hashing("backend unavailable".to_string()))
    }

    fn verify(&self, _password: &str, _salt: &str, _hash: &str) -> bool {
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn registered_user_is_sealed_and_verifies() {
    let shop = shop();
    let user = shop.register_user(new_user("alice", "hunter22")).unwrap();

    assert!(user.is_sealed());
    assert_eq!(user.salt().map(str::len), Some(16));
    assert_ne!(user.password_hash(), Some("hunter22"));

    assert!(shop.verify_password("alice", "hunter22").unwrap());
    assert!(!shop.verify_password("alice", "hunter23").unwrap());
    assert!(!shop.verify_password("bob", "hunter22").unwrap());
}

#[test]
fn resaving_a_sealed_user_keeps_salt_and_hash() {
    let shop = shop();
    let mut user = shop.register_user(new_user("alice", "hunter22")).unwrap();
    let (salt, hash) = (
        user.salt().map(str::to_string),
        user.password_hash().map(str::to_string),
    );

    user.set_token(Some("session".to_string()));
    let saved = shop.save_user(user).unwrap();

    assert_eq!(saved.salt().map(str::to_string), salt);
    assert_eq!(saved.password_hash().map(str::to_string), hash);
    assert_eq!(shop.user(*saved.id()).unwrap().token(), Some("session"));
}

#[test]
fn stored_salt_cannot_be_replaced() {
    let shop = shop();
    let stored = shop.register_user(new_user("alice", "hunter22")).unwrap();

    let replacement = User::register(*stored.id(), new_user("alice", "other-pw")).unwrap();
    let err = shop.save_user(replacement).unwrap_err();
    assert!(matches!(err, ShopError::Domain(DomainError::InvariantViolation(_))));

    assert_eq!(shop.user(*stored.id()).unwrap(), stored);
    assert!(shop.verify_password("alice", "hunter22").unwrap());
}

#[test]
fn hashing_failure_persists_nothing() {
    let shop = Shop::new(InMemoryStore::new(), Arc::new(FailingHasher));
    let err = shop.register_user(new_user("alice", "hunter22")).unwrap_err();

    assert!(matches!(err, ShopError::Credential(CredentialError::Hashing(_))));
    assert_eq!(shop.find_user_by_username("alice").unwrap(), None);
}

#[test]
fn usernames_are_unique_among_active_users() {
    let shop = shop();
    let first = register(&shop, "alice");

    let err = shop
        .register_user(new_user("alice", "another-pw"))
        .unwrap_err();
    assert!(err.is_conflict());

    shop.soft_delete_user(first).unwrap();
    let second = register(&shop, "alice");
    assert_ne!(first, second);
    assert_eq!(
        shop.find_user_by_username("alice").unwrap().map(|u| *u.id()),
        Some(second)
    );
}

#[test]
fn soft_deleted_user_cannot_shop() {
    let shop = shop();
    let user_id = register(&shop, "alice");
    let tea = product(&shop, "Tea", 5);

    let deleted = shop.soft_delete_user(user_id).unwrap();
    assert!(deleted.is_deleted());
    assert!(!shop.verify_password("alice", "hunter22").unwrap());

    let err = shop.add_to_cart(user_id, tea, 1).unwrap_err();
    assert!(err.is_not_found());
    assert!(shop.place_order(user_id).unwrap_err().is_not_found());
}

#[test]
fn shop_built_from_config_uses_configured_salt_length() {
    let mut config = ShopConfig::default();
    config.credentials.salt_length = 12;
    config.credentials.hashing = fast_params();

    let shop = Shop::from_config(InMemoryStore::new(), &config).unwrap();
    let user = shop.register_user(new_user("alice", "hunter22")).unwrap();
    assert_eq!(user.salt().map(str::len), Some(12));

    config.credentials.salt_length = 2;
    assert!(Shop::from_config(InMemoryStore::new(), &config).is_err());
}

#[test]
fn shop_from_lookup_applies_environment() {
    let vars = [
        (ENV_SALT_LENGTH, "10"),
        (ENV_HASH_MEMORY_KIB, "64"),
        (ENV_HASH_ITERATIONS, "1"),
        (ENV_HASH_PARALLELISM, "1"),
        (ENV_LOG_FORMAT, "pretty"),
    ];
    let lookup = |key: &str| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    };

    let shop = Shop::from_lookup(InMemoryStore::new(), lookup).unwrap();
    let user = shop.register_user(new_user("alice", "hunter22")).unwrap();
    assert_eq!(user.salt().map(str::len), Some(10));
}

#[test]
fn shop_from_lookup_reports_invalid_config() {
    let err = Shop::from_lookup(InMemoryStore::new(), |key: &str| {
        (key == ENV_SALT_LENGTH).then(|| "4".to_string())
    })
    .unwrap_err();

    assert!(matches!(
        err,
        ShopError::Config(ConfigError::Invalid {
            key: ENV_SALT_LENGTH,
            ..
        })
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Carts and order placement
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn add_to_cart_opens_one_cart_and_merges_lines() {
    let shop = shop();
    let user_id = register(&shop, "alice");
    let tea = product(&shop, "Tea", 10);
    let cups = product(&shop, "Cups", 10);

    shop.add_to_cart(user_id, tea, 2).unwrap();
    shop.add_to_cart(user_id, tea, 3).unwrap();
    shop.add_to_cart(user_id, cups, 1).unwrap();

    let view = shop.cart(user_id).unwrap().unwrap();
    assert_eq!(view.cart.user_id(), user_id);
    assert_eq!(view.items.len(), 2);
    let tea_line = view.items.iter().find(|i| i.product_id() == tea).unwrap();
    assert_eq!(tea_line.quantity().units(), 5);

    // Carts hold no stock.
    assert_eq!(stock(&shop, tea), 10);
}

#[test]
fn add_to_cart_validates_input() {
    let shop = shop();
    let user_id = register(&shop, "alice");
    let tea = product(&shop, "Tea", 10);

    assert!(matches!(
        shop.add_to_cart(user_id, tea, 0),
        Err(ShopError::Domain(DomainError::Validation(_)))
    ));
    assert!(shop.add_to_cart(user_id, ProductId::new(), 1).unwrap_err().is_not_found());
    assert!(shop.add_to_cart(UserId::new(), tea, 1).unwrap_err().is_not_found());
    assert_eq!(shop.cart(user_id).unwrap(), None);
}

#[test]
fn placing_an_order_consumes_the_cart_and_reserves_stock() {
    let shop = shop();
    let user_id = register(&shop, "alice");
    let tea = product(&shop, "Tea", 10);
    let cups = product(&shop, "Cups", 4);

    shop.add_to_cart(user_id, tea, 6).unwrap();
    shop.add_to_cart(user_id, cups, 4).unwrap();

    let placed = shop.place_order(user_id).unwrap();
    assert_eq!(placed.order.user_id(), user_id);
    assert_eq!(placed.items.len(), 2);
    assert!(placed.items.iter().all(|i| i.order_id() == *placed.order.id()));

    assert_eq!(shop.cart(user_id).unwrap(), None);
    assert_eq!(stock(&shop, tea), 4);
    assert_eq!(stock(&shop, cups), 0);

    let stored = shop.order(*placed.order.id()).unwrap();
    assert_eq!(stored.items.len(), 2);
}

#[test]
fn placing_an_order_without_a_cart_is_not_found() {
    let shop = shop();
    let user_id = register(&shop, "alice");

    let err = shop.place_order(user_id).unwrap_err();
    assert!(matches!(
        err,
        ShopError::Domain(DomainError::NotFound { entity: "cart", .. })
    ));
}

#[test]
fn failed_reservation_leaves_cart_and_stock_untouched() {
    let shop = shop();
    let user_id = register(&shop, "alice");
    let tea = product(&shop, "Tea", 10);
    let cups = product(&shop, "Cups", 1);

    shop.add_to_cart(user_id, tea, 3).unwrap();
    shop.add_to_cart(user_id, cups, 2).unwrap();
    let before = shop.cart(user_id).unwrap();

    let err = shop.place_order(user_id).unwrap_err();
    assert!(err.is_insufficient_stock());

    assert_eq!(shop.cart(user_id).unwrap(), before);
    assert_eq!(stock(&shop, tea), 10);
    assert_eq!(stock(&shop, cups), 1);
    assert_eq!(shop.product_version(tea).unwrap(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordered items
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn first_save_within_stock_decrements() {
    let shop = shop();
    let tea = product(&shop, "Tea", 10);
    let order_id = empty_order(&shop);

    let item = OrderedItem::new(order_id, tea, 4);
    let saved = shop.save_ordered_item(item.clone()).unwrap();

    assert_eq!(saved, SavedItem::Saved(item));
    assert_eq!(stock(&shop, tea), 6);
}

#[test]
fn first_save_beyond_stock_fails_without_mutation() {
    let shop = shop();
    let tea = product(&shop, "Tea", 10);
    let order_id = empty_order(&shop);

    let err = shop
        .save_ordered_item(OrderedItem::new(order_id, tea, 11))
        .unwrap_err();

    assert!(matches!(
        err,
        ShopError::Domain(DomainError::InsufficientStock {
            available: 10,
            requested: 11,
            ..
        })
    ));
    assert_eq!(stock(&shop, tea), 10);
    assert!(shop.order(order_id).unwrap().items.is_empty());
}

#[test]
fn resaving_moves_stock_by_the_difference() {
    let shop = shop();
    let tea = product(&shop, "Tea", 10);
    let order_id = empty_order(&shop);

    let mut item = OrderedItem::new(order_id, tea, 4);
    shop.save_ordered_item(item.clone()).unwrap();

    item.set_quantity(7);
    shop.save_ordered_item(item.clone()).unwrap();
    assert_eq!(stock(&shop, tea), 3);

    item.set_quantity(2);
    shop.save_ordered_item(item.clone()).unwrap();
    assert_eq!(stock(&shop, tea), 8);

    // Own reservation counts towards what is available.
    item.set_quantity(10);
    shop.save_ordered_item(item.clone()).unwrap();
    assert_eq!(stock(&shop, tea), 0);

    item.set_quantity(11);
    assert!(shop.save_ordered_item(item).unwrap_err().is_insufficient_stock());
    assert_eq!(stock(&shop, tea), 0);
}

#[test]
fn saving_zero_removes_the_item_and_releases_its_stock() {
    let shop = shop();
    let tea = product(&shop, "Tea", 10);
    let order_id = empty_order(&shop);

    let mut item = OrderedItem::new(order_id, tea, 5);
    shop.save_ordered_item(item.clone()).unwrap();

    item.set_quantity(0);
    let saved = shop.save_ordered_item(item.clone()).unwrap();
    assert_eq!(saved, SavedItem::Removed(*item.id()));
    assert!(shop.order(order_id).unwrap().items.is_empty());
    assert_eq!(stock(&shop, tea), 10);

    // A brand-new item saved with zero units never touches the ledger.
    let version = shop.product_version(tea).unwrap();
    let fresh = OrderedItem::new(order_id, tea, 0);
    assert_eq!(
        shop.save_ordered_item(fresh.clone()).unwrap(),
        SavedItem::Removed(*fresh.id())
    );
    assert_eq!(shop.product_version(tea).unwrap(), version);
}

#[test]
fn ordered_item_guards() {
    let shop = shop();
    let tea = product(&shop, "Tea", 10);
    let order_id = empty_order(&shop);

    assert!(shop
        .save_ordered_item(OrderedItem::new(order_id, ProductId::new(), 1))
        .unwrap_err()
        .is_not_found());
    assert!(shop
        .save_ordered_item(OrderedItem::new(OrderId::new(), tea, 1))
        .unwrap_err()
        .is_not_found());

    let item = OrderedItem::new(order_id, tea, 1);
    shop.save_ordered_item(item.clone()).unwrap();
    let mut cancelled = item.clone();
    cancelled.cancel();
    assert!(matches!(
        shop.save_ordered_item(cancelled),
        Err(ShopError::Domain(DomainError::Validation(_)))
    ));

    shop.cancel_order(order_id).unwrap();
    let err = shop.save_ordered_item(OrderedItem::new(order_id, tea, 1)).unwrap_err();
    assert!(matches!(err, ShopError::Domain(DomainError::InvariantViolation(_))));
    assert_eq!(stock(&shop, tea), 10);
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn cancelling_restores_stock_and_marks_items() {
    let shop = shop();
    let a = product(&shop, "A", 10);
    let b = product(&shop, "B", 5);
    let order_id = empty_order(&shop);

    shop.save_ordered_item(OrderedItem::new(order_id, a, 3)).unwrap();
    shop.save_ordered_item(OrderedItem::new(order_id, b, 2)).unwrap();
    assert_eq!((stock(&shop, a), stock(&shop, b)), (7, 3));

    let view = shop.cancel_order(order_id).unwrap();
    assert!(view.order.is_canceled());
    assert_eq!(view.items.len(), 2);
    assert!(view.items.iter().all(OrderedItem::is_canceled));
    assert_eq!((stock(&shop, a), stock(&shop, b)), (10, 5));

    let stored = shop.order(order_id).unwrap();
    assert!(stored.order.is_canceled());
    assert!(stored.items.iter().all(OrderedItem::is_canceled));
}

#[test]
fn cancelling_twice_restores_nothing_more() {
    let shop = shop();
    let a = product(&shop, "A", 10);
    let order_id = empty_order(&shop);
    shop.save_ordered_item(OrderedItem::new(order_id, a, 3)).unwrap();

    shop.cancel_order(order_id).unwrap();
    let version = shop.product_version(a).unwrap();

    shop.cancel_order(order_id).unwrap();
    assert_eq!(stock(&shop, a), 10);
    assert_eq!(shop.product_version(a).unwrap(), version);
}

#[test]
fn cancelling_an_order_larger_than_u64_in_total_succeeds() {
    let shop = shop();
    let a = product(&shop, "A", u64::MAX);
    let b = product(&shop, "B", 1);
    let order_id = empty_order(&shop);

    shop.save_ordered_item(OrderedItem::new(order_id, a, u64::MAX)).unwrap();
    shop.save_ordered_item(OrderedItem::new(order_id, b, 1)).unwrap();
    assert_eq!((stock(&shop, a), stock(&shop, b)), (0, 0));

    let view = shop.cancel_order(order_id).unwrap();
    assert!(view.items.iter().all(OrderedItem::is_canceled));
    assert_eq!((stock(&shop, a), stock(&shop, b)), (u64::MAX, 1));
}

#[test]
fn update_without_cancellation_moves_no_stock() {
    let shop = shop();
    let a = product(&shop, "A", 10);
    let order_id = empty_order(&shop);
    shop.save_ordered_item(OrderedItem::new(order_id, a, 3)).unwrap();

    let order = shop.order(order_id).unwrap().order;
    let view = shop.update_order(order.clone()).unwrap();
    assert!(!view.order.is_canceled());
    assert_eq!(stock(&shop, a), 7);

    let mut cancelled = order.clone();
    cancelled.cancel();
    shop.update_order(cancelled).unwrap();
    assert_eq!(stock(&shop, a), 10);

    // The stored order is cancelled now; sending the open version back is a reopen.
    let err = shop.update_order(order).unwrap_err();
    assert!(matches!(err, ShopError::Domain(DomainError::InvariantViolation(_))));
    assert_eq!(stock(&shop, a), 10);

    assert!(shop.update_order(Order::new(UserId::new())).unwrap_err().is_not_found());
}

#[test]
fn cancelling_an_unknown_order_is_not_found() {
    let shop = shop();
    assert!(shop.cancel_order(OrderId::new()).unwrap_err().is_not_found());
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger and concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn ledger_replays_to_current_stock() {
    let shop = shop();
    let tea = product(&shop, "Tea", 10);
    let order_id = empty_order(&shop);

    let mut item = OrderedItem::new(order_id, tea, 4);
    shop.save_ordered_item(item.clone()).unwrap();
    item.set_quantity(1);
    shop.save_ordered_item(item).unwrap();
    shop.receive_stock(tea, 5).unwrap();
    shop.cancel_order(order_id).unwrap();

    let ledger = shop.stock_ledger(tea).unwrap();
    let types: Vec<&str> = ledger.iter().map(|e| e.payload().event_type()).collect();
    assert_eq!(
        types,
        vec![
            "inventory.product.created",
            "inventory.stock.received",
            "inventory.stock.reserved",
            "inventory.stock.released",
            "inventory.stock.received",
            "inventory.stock.released",
        ]
    );
    assert!(ledger
        .iter()
        .enumerate()
        .all(|(idx, e)| e.sequence_number() == idx as u64 + 1));
    assert!(matches!(
        ledger.last().map(|e| e.payload()),
        Some(StockEvent::StockReleased(e)) if e.reason == ReleaseReason::Cancelled
    ));

    let replayed: i128 = ledger.iter().map(|e| e.payload().stock_delta()).sum();
    assert_eq!(replayed, i128::from(stock(&shop, tea)));
    assert_eq!(stock(&shop, tea), 15);
}

#[test]
fn unknown_product_has_no_ledger() {
    let shop = shop();
    assert!(shop.stock_ledger(ProductId::new()).unwrap_err().is_not_found());
    assert!(shop.receive_stock(ProductId::new(), 1).unwrap_err().is_not_found());
}

#[test]
fn order_placement_racing_a_cart_change_conflicts() {
    let shop = shop();
    let user_id = register(&shop, "alice");
    let tea = product(&shop, "Tea", 10);
    shop.add_to_cart(user_id, tea, 1).unwrap();

    // A transaction that consumes the cart, interleaved with another add_to_cart.
    let mut tx = Transaction::begin(shop.store());
    let cart = tx.scan::<Cart, _>(|c| c.user_id() == user_id).unwrap().remove(0);
    tx.delete::<Cart>(cart.id()).unwrap();

    shop.add_to_cart(user_id, tea, 2).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(
        shop.cart(user_id).unwrap().unwrap().items[0].quantity().units(),
        3
    );
}

#[test]
fn concurrent_reservations_cannot_both_commit() {
    let shop = shop();
    let tea = product(&shop, "Tea", 5);
    let order_id = empty_order(&shop);

    // Stale view of the ledger taken before the shop reserves.
    let mut stale = Transaction::begin(shop.store());
    assert_eq!(stale.product(tea).unwrap().stock(), 5);

    shop.save_ordered_item(OrderedItem::new(order_id, tea, 4)).unwrap();

    stale
        .execute(
            tea,
            &shopping_inventory::ProductCommand::ReserveStock(shopping_inventory::ReserveStock {
                product_id: tea,
                ordered_item_id: shopping_core::OrderedItemId::new(),
                quantity: shopping_core::Quantity::new(4),
                occurred_at: chrono::Utc::now(),
            }),
        )
        .unwrap();
    assert!(stale.commit().unwrap_err().is_conflict());
    assert_eq!(stock(&shop, tea), 1);
}

mod proptest_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: across any sequence of saves of one item, stock never goes
        /// negative and stock plus the item's held quantity equals the initial stock.
        #[test]
        fn stock_plus_reservation_is_conserved(
            initial in 0u64..50,
            quantities in proptest::collection::vec(0u64..60, 1..12)
        ) {
            let shop = shop();
            let tea = product(&shop, "Tea", initial);
            let order_id = empty_order(&shop);
            let mut item = OrderedItem::new(order_id, tea, 0);
            let mut held = 0u64;

            for q in quantities {
                item.set_quantity(q);
                match shop.save_ordered_item(item.clone()) {
                    Ok(_) => held = q,
                    Err(e) => {
                        prop_assert!(e.is_insufficient_stock());
                        prop_assert!(q > initial);
                    }
                }
                let current = stock(&shop, tea);
                prop_assert_eq!(current + held, initial);
            }
        }
    }
}
