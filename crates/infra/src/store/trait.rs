use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shopping_auth::User;
use shopping_core::{
    CartId, CartItemId, Entity, ExpectedVersion, OrderId, OrderedItemId, ProductId, UserId,
};
use shopping_inventory::PRODUCT_STREAM_TYPE;
use shopping_sales::{Cart, CartItem, Order, OrderedItem};

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Record tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RecordKind {
    User,
    Cart,
    CartItem,
    Order,
    OrderedItem,
}

/// Primary key of a stored record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    User(UserId),
    Cart(CartId),
    CartItem(CartItemId),
    Order(OrderId),
    OrderedItem(OrderedItemId),
}

impl RecordKey {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordKey::User(_) => RecordKind::User,
            RecordKey::Cart(_) => RecordKind::Cart,
            RecordKey::CartItem(_) => RecordKind::CartItem,
            RecordKey::Order(_) => RecordKind::Order,
            RecordKey::OrderedItem(_) => RecordKind::OrderedItem,
        }
    }
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecordKey::User(id) => write!(f, "user/{id}"),
            RecordKey::Cart(id) => write!(f, "cart/{id}"),
            RecordKey::CartItem(id) => write!(f, "cart_item/{id}"),
            RecordKey::Order(id) => write!(f, "order/{id}"),
            RecordKey::OrderedItem(id) => write!(f, "ordered_item/{id}"),
        }
    }
}

/// A stored record of any table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    User(User),
    Cart(Cart),
    CartItem(CartItem),
    Order(Order),
    OrderedItem(OrderedItem),
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Record::User(r) => RecordKey::User(*r.id()),
            Record::Cart(r) => RecordKey::Cart(*r.id()),
            Record::CartItem(r) => RecordKey::CartItem(*r.id()),
            Record::Order(r) => RecordKey::Order(*r.id()),
            Record::OrderedItem(r) => RecordKey::OrderedItem(*r.id()),
        }
    }
}

/// Typed access to one record table.
pub trait StoredRecord: Entity + Clone + Sized {
    const KIND: RecordKind;

    fn key_of(id: &Self::Id) -> RecordKey;

    fn into_record(self) -> Record;

    fn from_record(record: Record) -> Option<Self>;

    fn key(&self) -> RecordKey {
        Self::key_of(self.id())
    }
}

macro_rules! impl_stored_record {
    ($t:ident) => {
        impl StoredRecord for $t {
            const KIND: RecordKind = RecordKind::$t;

            fn key_of(id: &Self::Id) -> RecordKey {
                RecordKey::$t(*id)
            }

            fn into_record(self) -> Record {
                Record::$t(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$t(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

impl_stored_record!(User);
impl_stored_record!(Cart);
impl_stored_record!(CartItem);
impl_stored_record!(Order);
impl_stored_record!(OrderedItem);

/// A record together with its row version (starts at 1, +1 per committed write).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub version: u64,
    pub record: Record,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stock ledger entries
// ─────────────────────────────────────────────────────────────────────────────

/// A ledger entry ready to be appended (not yet assigned a sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEntry {
    pub entry_id: Uuid,
    pub product_id: ProductId,

    pub entry_type: String,
    pub entry_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEntry {
    /// Build an entry from a typed stock event.
    pub fn from_typed<E>(
        product_id: ProductId,
        entry_id: Uuid,
        event: &E,
    ) -> Result<Self, StoreError>
    where
        E: shopping_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| StoreError::InvalidCommit(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            entry_id,
            product_id,
            entry_type: event.event_type().to_string(),
            entry_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A ledger entry stored in a product stream (assigned a sequence number).
///
/// Sequence numbers start at 1, have no gaps, and the last one is the product's
/// version used for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub entry_id: Uuid,
    pub product_id: ProductId,

    /// Monotonically increasing position in the product stream.
    pub sequence_number: u64,

    pub entry_type: String,
    pub entry_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEntry {
    pub fn to_envelope(&self) -> shopping_events::EventEnvelope<JsonValue> {
        shopping_events::EventEnvelope::new(
            self.entry_id,
            *self.product_id.as_uuid(),
            PRODUCT_STREAM_TYPE,
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Change sets
// ─────────────────────────────────────────────────────────────────────────────

/// What a transaction does to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Insert or replace.
    Put(Record),
    Delete,
    /// Bump the version without changing the record.
    Touch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub key: RecordKey,
    pub change: Change,
}

/// Everything a transaction wants to commit, with the versions it relied on.
///
/// `reads` maps each record the transaction observed to the version it saw
/// (0 = absent). Every written key must appear in `reads`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub reads: HashMap<RecordKey, u64>,
    pub ledger_reads: HashMap<ProductId, ExpectedVersion>,
    pub writes: Vec<Write>,
    pub entries: Vec<UncommittedEntry>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.entries.is_empty()
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub records_written: usize,
    pub entries: Vec<StoredEntry>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Store operation error.
///
/// These are storage failures (concurrency, constraints, corruption) as opposed to
/// domain errors (validation, stock, missing records).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("corrupt ledger: {0}")]
    CorruptLedger(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Transactional record store with per-product stock ledgers.
///
/// ## Commit Semantics
///
/// `commit()` is atomic: it checks every version in `reads` and `ledger_reads`
/// against the current state, checks unique constraints (one active username,
/// one cart per user), and only then applies all writes and appends all entries.
/// Any failed check leaves the store untouched.
pub trait Store: Send + Sync {
    /// Read one record with its version.
    fn read(&self, key: RecordKey) -> Result<Option<Row>, StoreError>;

    /// Read all records of a table.
    fn scan(&self, kind: RecordKind) -> Result<Vec<Row>, StoreError>;

    /// Load a product's full ledger in sequence order. Empty if the product does not exist.
    fn load_ledger(&self, product_id: ProductId) -> Result<Vec<StoredEntry>, StoreError>;

    /// Atomically validate and apply a change set.
    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;
}

impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    fn read(&self, key: RecordKey) -> Result<Option<Row>, StoreError> {
        (**self).read(key)
    }

    fn scan(&self, kind: RecordKind) -> Result<Vec<Row>, StoreError> {
        (**self).scan(kind)
    }

    fn load_ledger(&self, product_id: ProductId) -> Result<Vec<StoredEntry>, StoreError> {
        (**self).load_ledger(product_id)
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        (**self).commit(changes)
    }
}
