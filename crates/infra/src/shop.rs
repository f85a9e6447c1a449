//! Shop operations: the transactional entry points for users, carts, orders and stock.
//!
//! Every public method runs one [`Transaction`]: it reads what it needs, buffers its
//! writes and ledger entries, and commits them together. Any error returns before
//! the commit, so a failed operation leaves no trace in the store.
//!
//! ## Rules enforced here
//!
//! - **Credentials**: a user is sealed (salted and hashed) on its first save and its
//!   salt never changes afterwards.
//! - **Order placement**: the user's cart and cart items are consumed by the order
//!   they turn into.
//! - **Stock reservation**: saving an ordered item moves stock by the difference
//!   between the quantity it already held and the new one, never below zero.
//! - **Cancellation**: cancelling an order puts every live item's quantity back.

use std::sync::Arc;

use chrono::Utc;

use shopping_auth::{Argon2Hasher, CredentialHasher, NewUser, User};
use shopping_core::{
    AggregateRoot, DomainError, Entity, OrderId, OrderedItemId, ProductId, Quantity, UserId,
};
use shopping_events::EventEnvelope;
use shopping_inventory::{
    CreateProduct, Product, ProductCommand, ReceiveStock, ReleaseReason, ReleaseStock,
    StockEvent, StockMovement, plan,
};
use shopping_sales::{Cart, CartItem, Order, OrderedItem};

use crate::config::ShopConfig;
use crate::error::ShopResult;
use crate::store::Store;
use crate::transaction::{Transaction, decode_entry};

/// A cart with its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub cart: Cart,
    pub items: Vec<CartItem>,
}

/// An order with its lines (cancelled lines included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderView {
    pub order: Order,
    pub items: Vec<OrderedItem>,
}

/// Outcome of [`Shop::save_ordered_item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedItem {
    /// The item is stored with its new quantity.
    Saved(OrderedItem),
    /// The quantity was zero, so the item no longer exists.
    Removed(OrderedItemId),
}

/// Application service over a [`Store`].
pub struct Shop<S: Store> {
    store: S,
    hasher: Arc<dyn CredentialHasher>,
}

impl<S: Store> core::fmt::Debug for Shop<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Shop").finish_non_exhaustive()
    }
}

impl<S: Store> Shop<S> {
    pub fn new(store: S, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { store, hasher }
    }

    /// Build a shop whose hasher follows `config.credentials`.
    pub fn from_config(store: S, config: &ShopConfig) -> ShopResult<Self> {
        let hasher = Argon2Hasher::new(
            config.credentials.salt_length,
            config.credentials.hashing,
        )?;
        Ok(Self::new(store, Arc::new(hasher)))
    }

    /// Load configuration from the `SHOPPING_*` environment, set up logging and build
    /// the shop.
    pub fn from_env(store: S) -> ShopResult<Self> {
        Self::from_lookup(store, |key| std::env::var(key).ok())
    }

    /// Same as [`Shop::from_env`] with `lookup` resolving variable names.
    pub fn from_lookup<F>(store: S, lookup: F) -> ShopResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = ShopConfig::from_lookup(lookup)?;
        config.init_logging();
        Self::from_config(store, &config)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn begin(&self) -> Transaction<'_, S> {
        Transaction::begin(&self.store)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate registration input, then save the new user.
    #[tracing::instrument(skip(self, input), fields(username = %input.username), err)]
    pub fn register_user(&self, input: NewUser) -> ShopResult<User> {
        let user = User::register(UserId::new(), input)?;
        self.save_user(user)
    }

    /// Insert or update a user.
    ///
    /// A user without a salt is sealed first; if hashing fails nothing is stored.
    /// A stored salt can never be replaced.
    #[tracing::instrument(skip(self, user), fields(user_id = %user.id()), err)]
    pub fn save_user(&self, mut user: User) -> ShopResult<User> {
        let mut tx = self.begin();

        if let Some(stored) = tx.get::<User>(user.id())? {
            if stored.salt().is_some() && stored.salt() != user.salt() {
                return Err(DomainError::invariant("salt cannot change once set").into());
            }
        }

        user.seal_credentials(&*self.hasher)?;

        if !user.is_deleted() {
            let taken = tx.scan::<User, _>(|other| {
                other.id() != user.id()
                    && !other.is_deleted()
                    && other.username() == user.username()
            })?;
            if !taken.is_empty() {
                return Err(DomainError::conflict(format!(
                    "username '{}' is taken",
                    user.username()
                ))
                .into());
            }
        }

        tx.put(user.clone())?;
        tx.commit()?;

        tracing::info!(user_id = %user.id(), username = user.username(), "user saved");
        Ok(user)
    }

    pub fn user(&self, user_id: UserId) -> ShopResult<User> {
        self.begin().require::<User>(&user_id, "user")
    }

    /// Active (not soft-deleted) user with this username.
    pub fn find_user_by_username(&self, username: &str) -> ShopResult<Option<User>> {
        let username = username.trim();
        let found = self
            .begin()
            .scan::<User, _>(|u| !u.is_deleted() && u.username() == username)?;
        Ok(found.into_iter().next())
    }

    /// Check a username/password pair. Unknown or deleted users never match.
    #[tracing::instrument(skip(self, password), err)]
    pub fn verify_password(&self, username: &str, password: &str) -> ShopResult<bool> {
        let Some(user) = self.find_user_by_username(username)? else {
            tracing::debug!("no active user with that username");
            return Ok(false);
        };
        Ok(user.verify_password(password, &*self.hasher)?)
    }

    /// Flag a user as deleted. The record stays; the user can no longer shop.
    #[tracing::instrument(skip(self), err)]
    pub fn soft_delete_user(&self, user_id: UserId) -> ShopResult<User> {
        let mut tx = self.begin();
        let mut user = tx.require::<User>(&user_id, "user")?;
        if user.is_deleted() {
            return Ok(user);
        }

        user.soft_delete();
        tx.put(user.clone())?;
        tx.commit()?;

        tracing::info!(%user_id, "user soft-deleted");
        Ok(user)
    }

    fn require_active_user(tx: &mut Transaction<'_, S>, user_id: UserId) -> ShopResult<User> {
        let user = tx.require::<User>(&user_id, "user")?;
        if user.is_deleted() {
            return Err(DomainError::not_found("user", user_id).into());
        }
        Ok(user)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Products
    // ─────────────────────────────────────────────────────────────────────────

    #[tracing::instrument(skip(self), err)]
    pub fn create_product(&self, name: &str, initial_stock: u64) -> ShopResult<Product> {
        let product_id = ProductId::new();
        let mut tx = self.begin();
        tx.execute(
            product_id,
            &ProductCommand::CreateProduct(CreateProduct {
                product_id,
                name: name.to_string(),
                initial_stock: Quantity::new(initial_stock),
                occurred_at: Utc::now(),
            }),
        )?;
        let product = tx.product(product_id)?;
        tx.commit()?;

        tracing::info!(%product_id, stock = product.stock(), "product created");
        Ok(product)
    }

    /// Restock: add `quantity` units to a product.
    #[tracing::instrument(skip(self), err)]
    pub fn receive_stock(&self, product_id: ProductId, quantity: u64) -> ShopResult<Product> {
        let mut tx = self.begin();
        tx.execute(
            product_id,
            &ProductCommand::ReceiveStock(ReceiveStock {
                product_id,
                quantity: Quantity::new(quantity),
                occurred_at: Utc::now(),
            }),
        )?;
        let product = tx.product(product_id)?;
        tx.commit()?;

        tracing::info!(%product_id, stock = product.stock(), "stock received");
        Ok(product)
    }

    pub fn product(&self, product_id: ProductId) -> ShopResult<Product> {
        let product = self.begin().product(product_id)?;
        if !product.exists() {
            return Err(DomainError::not_found("product", product_id).into());
        }
        Ok(product)
    }

    /// Full stock history of a product, oldest entry first.
    pub fn stock_ledger(
        &self,
        product_id: ProductId,
    ) -> ShopResult<Vec<EventEnvelope<StockEvent>>> {
        let stored = self.store.load_ledger(product_id)?;
        if stored.is_empty() {
            return Err(DomainError::not_found("product", product_id).into());
        }

        stored
            .iter()
            .map(|entry| entry.to_envelope().try_map_payload(|p| decode_entry(&p)))
            .collect()
    }

    /// Reserve or release stock so that `item_id` holds `requested` units instead of `prior`.
    fn reserve_in(
        tx: &mut Transaction<'_, S>,
        product_id: ProductId,
        item_id: OrderedItemId,
        prior: Quantity,
        requested: Quantity,
    ) -> ShopResult<StockMovement> {
        let product = tx.product(product_id)?;
        if !product.exists() {
            return Err(DomainError::not_found("product", product_id).into());
        }

        let movement = plan(product_id, product.stock(), prior, requested).inspect_err(|e| {
            tracing::warn!(
                %product_id,
                ordered_item_id = %item_id,
                available = product.stock(),
                %prior,
                %requested,
                error = %e,
                "reservation rejected"
            );
        })?;
        tracing::debug!(
            %product_id,
            ordered_item_id = %item_id,
            ?movement,
            "stock movement planned"
        );

        if let Some(command) =
            movement.into_command(product_id, item_id, ReleaseReason::Adjusted, Utc::now())
        {
            tx.execute(product_id, &command)?;
        }
        Ok(movement)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Carts
    // ─────────────────────────────────────────────────────────────────────────

    fn find_cart(tx: &mut Transaction<'_, S>, user_id: UserId) -> ShopResult<Option<Cart>> {
        Ok(tx
            .scan::<Cart, _>(|c| c.user_id() == user_id)?
            .into_iter()
            .next())
    }

    /// Add units of a product to the user's cart, opening the cart if needed.
    ///
    /// No stock is reserved until the cart becomes an order.
    #[tracing::instrument(skip(self), err)]
    pub fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u64,
    ) -> ShopResult<CartItem> {
        Quantity::positive(quantity)?;

        let mut tx = self.begin();
        Self::require_active_user(&mut tx, user_id)?;
        if !tx.product(product_id)?.exists() {
            return Err(DomainError::not_found("product", product_id).into());
        }

        let cart = match Self::find_cart(&mut tx, user_id)? {
            Some(cart) => cart,
            None => {
                let cart = Cart::open(user_id);
                tx.put(cart.clone())?;
                cart
            }
        };
        let cart_id = *cart.id();

        let existing = tx
            .scan::<CartItem, _>(|i| i.cart_id() == cart_id && i.product_id() == product_id)?
            .into_iter()
            .next();
        let item = match existing {
            Some(mut item) => {
                item.add(quantity)?;
                item
            }
            None => CartItem::new(cart_id, product_id, quantity)?,
        };

        tx.put(item.clone())?;
        tx.touch::<Cart>(&cart_id)?;
        tx.touch::<User>(&user_id)?;
        tx.commit()?;

        tracing::info!(
            %user_id,
            %cart_id,
            %product_id,
            quantity = %item.quantity(),
            "cart updated"
        );
        Ok(item)
    }

    /// The user's cart, if one is open.
    pub fn cart(&self, user_id: UserId) -> ShopResult<Option<CartView>> {
        let mut tx = self.begin();
        let Some(cart) = Self::find_cart(&mut tx, user_id)? else {
            return Ok(None);
        };
        let cart_id = *cart.id();
        let items = tx.scan::<CartItem, _>(|i| i.cart_id() == cart_id)?;
        Ok(Some(CartView { cart, items }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────────────────

    /// Turn the user's cart into an order.
    ///
    /// Every cart line becomes an ordered item reserving its stock; the cart and its
    /// lines are deleted. Fails with `NotFound` if the user has no cart, and with
    /// `InsufficientStock` (changing nothing) if any line cannot be reserved.
    #[tracing::instrument(skip(self), err)]
    pub fn place_order(&self, user_id: UserId) -> ShopResult<OrderView> {
        let mut tx = self.begin();
        Self::require_active_user(&mut tx, user_id)?;

        let cart = Self::find_cart(&mut tx, user_id)?
            .ok_or_else(|| DomainError::not_found("cart", user_id))?;
        let cart_id = *cart.id();
        let cart_items = tx.scan::<CartItem, _>(|i| i.cart_id() == cart_id)?;

        let order = Order::new(user_id);
        let order_id = *order.id();
        tx.put(order.clone())?;

        let mut items = Vec::with_capacity(cart_items.len());
        for cart_item in &cart_items {
            let item = OrderedItem::from_cart_item(order_id, cart_item);
            Self::reserve_in(
                &mut tx,
                item.product_id(),
                *item.id(),
                Quantity::ZERO,
                item.quantity(),
            )?;
            tx.put(item.clone())?;
            tx.delete::<CartItem>(cart_item.id())?;
            items.push(item);
        }

        tx.delete::<Cart>(&cart_id)?;
        tx.touch::<User>(&user_id)?;
        tx.commit()?;

        tracing::info!(%user_id, %order_id, items = items.len(), "order placed");
        Ok(OrderView { order, items })
    }

    /// Insert or re-save an ordered item, moving stock by the change in quantity.
    ///
    /// A quantity of zero releases everything the item held and removes it.
    #[tracing::instrument(
        skip(self, item),
        fields(ordered_item_id = %item.id(), quantity = %item.quantity()),
        err
    )]
    pub fn save_ordered_item(&self, item: OrderedItem) -> ShopResult<SavedItem> {
        if item.is_canceled() {
            return Err(DomainError::validation(
                "ordered items are cancelled through their order",
            )
            .into());
        }

        let mut tx = self.begin();
        let order_id = item.order_id();
        let order = tx.require::<Order>(&order_id, "order")?;
        if order.is_canceled() {
            return Err(DomainError::invariant("order is cancelled").into());
        }

        let stored = tx.get::<OrderedItem>(item.id())?;
        let prior = match &stored {
            Some(stored) => {
                item.ensure_same_line(stored)?;
                stored.quantity()
            }
            None => Quantity::ZERO,
        };

        let movement = Self::reserve_in(
            &mut tx,
            item.product_id(),
            *item.id(),
            prior,
            item.quantity(),
        )?;

        let saved = if item.quantity().is_zero() {
            if stored.is_some() {
                tx.delete::<OrderedItem>(item.id())?;
            }
            SavedItem::Removed(*item.id())
        } else {
            tx.put(item.clone())?;
            SavedItem::Saved(item.clone())
        };
        tx.touch::<Order>(&order_id)?;
        tx.commit()?;

        tracing::info!(%order_id, ordered_item_id = %item.id(), ?movement, "ordered item saved");
        Ok(saved)
    }

    /// Store changes to an order. Setting the cancellation flag restores stock for
    /// every item that is not cancelled yet and marks those items cancelled.
    #[tracing::instrument(
        skip(self, order),
        fields(order_id = %order.id(), cancel = order.is_canceled()),
        err
    )]
    pub fn update_order(&self, order: Order) -> ShopResult<OrderView> {
        let mut tx = self.begin();
        let stored = tx.require::<Order>(order.id(), "order")?;
        order.ensure_update_allowed(&stored)?;
        Self::finish_update(tx, order)
    }

    /// Cancel an order and put its reserved stock back.
    ///
    /// Cancelling an order that is already cancelled changes nothing.
    #[tracing::instrument(skip(self), err)]
    pub fn cancel_order(&self, order_id: OrderId) -> ShopResult<OrderView> {
        let mut tx = self.begin();
        let mut order = tx.require::<Order>(&order_id, "order")?;
        order.cancel();
        Self::finish_update(tx, order)
    }

    fn finish_update(mut tx: Transaction<'_, S>, order: Order) -> ShopResult<OrderView> {
        let order_id = *order.id();
        let mut items = tx.scan::<OrderedItem, _>(|i| i.order_id() == order_id)?;

        let mut restored = 0usize;
        if order.is_canceled() {
            for item in items.iter_mut().filter(|i| !i.is_canceled()) {
                if !item.quantity().is_zero() {
                    tx.execute(
                        item.product_id(),
                        &ProductCommand::ReleaseStock(ReleaseStock {
                            product_id: item.product_id(),
                            ordered_item_id: *item.id(),
                            quantity: item.quantity(),
                            reason: ReleaseReason::Cancelled,
                            occurred_at: Utc::now(),
                        }),
                    )?;
                    tracing::debug!(
                        %order_id,
                        ordered_item_id = %item.id(),
                        product_id = %item.product_id(),
                        quantity = %item.quantity(),
                        "stock restored"
                    );
                    restored += 1;
                }
                item.cancel();
                tx.put(item.clone())?;
            }
        }

        tx.put(order.clone())?;
        tx.commit()?;

        tracing::info!(
            %order_id,
            canceled = order.is_canceled(),
            restored_items = restored,
            "order updated"
        );
        Ok(OrderView { order, items })
    }

    pub fn order(&self, order_id: OrderId) -> ShopResult<OrderView> {
        let mut tx = self.begin();
        let order = tx.require::<Order>(&order_id, "order")?;
        let items = tx.scan::<OrderedItem, _>(|i| i.order_id() == order_id)?;
        Ok(OrderView { order, items })
    }

    /// Current stock of a product, as the fold of its ledger.
    pub fn stock(&self, product_id: ProductId) -> ShopResult<u64> {
        Ok(self.product(product_id)?.stock())
    }

    /// Ledger version of a product (number of entries).
    pub fn product_version(&self, product_id: ProductId) -> ShopResult<u64> {
        Ok(self.product(product_id)?.version())
    }
}

