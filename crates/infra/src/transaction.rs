//! Unit of work over a [`Store`].
//!
//! A `Transaction` reads through to the store, remembering the version of every
//! record and ledger it looked at, and buffers every write. Nothing reaches the
//! store until [`Transaction::commit`], which hands the whole change set to
//! [`Store::commit`] for an all-or-nothing, version-checked apply. Dropping a
//! transaction discards its changes.
//!
//! ```text
//! begin ─► get/scan/product (reads recorded)
//!       ─► put/delete/touch/execute (buffered)
//!       ─► commit: versions still match? apply all : Conflict
//! ```

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use shopping_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, ProductId};
use shopping_inventory::{Product, ProductCommand, StockEvent};

use crate::error::{ShopError, ShopResult};
use crate::store::{
    Change, ChangeSet, CommitReceipt, Record, RecordKey, Store, StoreError, StoredEntry,
    StoredRecord, UncommittedEntry, Write,
};

#[derive(Debug)]
struct LedgerState {
    product: Product,
    /// Stream version when first loaded by this transaction.
    loaded_version: u64,
}

/// Buffered, optimistic unit of work.
pub struct Transaction<'s, S: Store + ?Sized> {
    store: &'s S,
    reads: HashMap<RecordKey, u64>,
    writes: HashMap<RecordKey, Change>,
    write_order: Vec<RecordKey>,
    ledgers: HashMap<ProductId, LedgerState>,
    entries: Vec<UncommittedEntry>,
}

impl<S: Store + ?Sized> core::fmt::Debug for Transaction<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transaction")
            .field("reads", &self.reads.len())
            .field("writes", &self.writes.len())
            .field("ledgers", &self.ledgers.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<'s, S: Store + ?Sized> Transaction<'s, S> {
    pub fn begin(store: &'s S) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            writes: HashMap::new(),
            write_order: Vec::new(),
            ledgers: HashMap::new(),
            entries: Vec::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Record the stored version of `key` (once) and return the stored record.
    fn observe(&mut self, key: RecordKey) -> ShopResult<Option<Record>> {
        let row = self.store.read(key)?;
        self.reads
            .entry(key)
            .or_insert_with(|| row.as_ref().map(|r| r.version).unwrap_or(0));
        Ok(row.map(|r| r.record))
    }

    /// Fetch a record as this transaction sees it (buffered writes first).
    pub fn get<T: StoredRecord>(&mut self, id: &T::Id) -> ShopResult<Option<T>> {
        let key = T::key_of(id);
        match self.writes.get(&key) {
            Some(Change::Put(record)) => return Ok(T::from_record(record.clone())),
            Some(Change::Delete) => return Ok(None),
            Some(Change::Touch) | None => {}
        }
        Ok(self.observe(key)?.and_then(T::from_record))
    }

    /// Fetch a record or fail with `NotFound`.
    pub fn require<T: StoredRecord>(&mut self, id: &T::Id, entity: &'static str) -> ShopResult<T>
    where
        T::Id: core::fmt::Display,
    {
        self.get::<T>(id)?
            .ok_or_else(|| DomainError::not_found(entity, id).into())
    }

    /// All records of `T` matching `filter`, as this transaction sees them, in key order.
    pub fn scan<T, F>(&mut self, filter: F) -> ShopResult<Vec<T>>
    where
        T: StoredRecord,
        F: Fn(&T) -> bool,
    {
        let mut found: Vec<(RecordKey, T)> = Vec::new();

        for row in self.store.scan(T::KIND)? {
            let key = row.record.key();
            if matches!(
                self.writes.get(&key),
                Some(Change::Put(_) | Change::Delete)
            ) {
                continue;
            }
            if let Some(record) = T::from_record(row.record) {
                if filter(&record) {
                    self.reads.entry(key).or_insert(row.version);
                    found.push((key, record));
                }
            }
        }

        for key in &self.write_order {
            if key.kind() != T::KIND {
                continue;
            }
            if let Some(Change::Put(record)) = self.writes.get(key) {
                if let Some(record) = T::from_record(record.clone()).filter(|r| filter(r)) {
                    found.push((*key, record));
                }
            }
        }

        found.sort_by_key(|(key, _)| *key);
        Ok(found.into_iter().map(|(_, record)| record).collect())
    }

    fn stage(&mut self, key: RecordKey, change: Change) -> ShopResult<()> {
        if !self.reads.contains_key(&key) {
            self.observe(key)?;
        }

        let merged = match (self.writes.remove(&key), change) {
            // A touch never weakens a pending put or delete.
            (Some(existing @ (Change::Put(_) | Change::Delete)), Change::Touch) => existing,
            (_, change) => change,
        };
        if !self.write_order.contains(&key) {
            self.write_order.push(key);
        }
        self.writes.insert(key, merged);
        Ok(())
    }

    /// Insert or replace a record.
    pub fn put<T: StoredRecord>(&mut self, record: T) -> ShopResult<()> {
        self.stage(record.key(), Change::Put(record.into_record()))
    }

    pub fn delete<T: StoredRecord>(&mut self, id: &T::Id) -> ShopResult<()> {
        self.stage(T::key_of(id), Change::Delete)
    }

    /// Bump a parent record's version so concurrent readers of it conflict.
    pub fn touch<T: StoredRecord>(&mut self, id: &T::Id) -> ShopResult<()> {
        self.stage(T::key_of(id), Change::Touch)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stock ledgers
    // ─────────────────────────────────────────────────────────────────────────

    fn ledger(&mut self, product_id: ProductId) -> ShopResult<&mut LedgerState> {
        if !self.ledgers.contains_key(&product_id) {
            let history = self.store.load_ledger(product_id)?;
            validate_loaded_ledger(product_id, &history)?;

            let mut product = Product::empty(product_id);
            apply_history(&mut product, &history)?;
            let loaded_version = product.version();
            self.ledgers.insert(
                product_id,
                LedgerState {
                    product,
                    loaded_version,
                },
            );
        }

        self.ledgers
            .get_mut(&product_id)
            .ok_or_else(|| ShopError::Store(StoreError::Unavailable("ledger cache".to_string())))
    }

    /// Current product state (including entries buffered in this transaction).
    ///
    /// A product that was never created comes back with `exists() == false`.
    pub fn product(&mut self, product_id: ProductId) -> ShopResult<Product> {
        Ok(self.ledger(product_id)?.product.clone())
    }

    /// Decide ledger entries for `command`, apply them to the buffered product state
    /// and queue them for append.
    pub fn execute(
        &mut self,
        product_id: ProductId,
        command: &ProductCommand,
    ) -> ShopResult<Vec<StockEvent>> {
        let state = self.ledger(product_id)?;
        let decided = state.product.handle(command)?;
        for event in &decided {
            state.product.apply(event);
        }

        for event in &decided {
            let entry = UncommittedEntry::from_typed(product_id, Uuid::now_v7(), event)?;
            self.entries.push(entry);
        }
        Ok(decided)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty() && self.entries.is_empty()
    }

    /// Validate and apply everything buffered, or nothing.
    pub fn commit(mut self) -> ShopResult<CommitReceipt> {
        if self.is_read_only() {
            return Ok(CommitReceipt::default());
        }

        let writes = self
            .write_order
            .iter()
            .filter_map(|key| {
                self.writes.remove(key).map(|change| Write { key: *key, change })
            })
            .collect();

        let changes = ChangeSet {
            reads: self.reads,
            ledger_reads: self
                .ledgers
                .iter()
                .map(|(id, state)| (*id, ExpectedVersion::Exact(state.loaded_version)))
                .collect(),
            writes,
            entries: self.entries,
        };

        let started = Utc::now();
        let receipt = self.store.commit(changes).inspect_err(|e| {
            tracing::warn!(error = %e, "transaction commit rejected");
        })?;
        tracing::debug!(
            records = receipt.records_written,
            entries = receipt.entries.len(),
            elapsed_us = (Utc::now() - started).num_microseconds().unwrap_or(0),
            "transaction committed"
        );
        Ok(receipt)
    }
}

fn validate_loaded_ledger(product_id: ProductId, stream: &[StoredEntry]) -> ShopResult<()> {
    // Guard against a backend returning another stream or a broken sequence.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.product_id != product_id {
            return Err(ShopError::Store(StoreError::CorruptLedger(format!(
                "loaded ledger contains wrong product_id at index {idx}"
            ))));
        }
        if e.sequence_number != last + 1 {
            return Err(ShopError::Store(StoreError::CorruptLedger(format!(
                "non-contiguous sequence_number in ledger (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history(product: &mut Product, history: &[StoredEntry]) -> ShopResult<()> {
    for stored in history {
        let event = decode_entry(&stored.payload)?;
        product.apply(&event);
    }
    Ok(())
}

pub(crate) fn decode_entry(payload: &JsonValue) -> ShopResult<StockEvent> {
    serde_json::from_value(payload.clone())
        .map_err(|e| ShopError::Store(StoreError::CorruptLedger(e.to_string())))
}
