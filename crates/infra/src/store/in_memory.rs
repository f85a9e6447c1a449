use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use shopping_core::ProductId;

use super::r#trait::{
    Change, ChangeSet, CommitReceipt, Record, RecordKey, RecordKind, Row, Store, StoreError,
    StoredEntry,
};

#[derive(Debug, Default)]
struct State {
    rows: HashMap<RecordKey, Row>,
    ledgers: HashMap<ProductId, Vec<StoredEntry>>,
}

/// In-memory transactional store.
///
/// Intended for tests/dev. Commits are serialized behind one write lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger_version(stream: &[StoredEntry]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}

impl Store for InMemoryStore {
    fn read(&self, key: RecordKey) -> Result<Option<Row>, StoreError> {
        let state = self.state.read().map_err(Self::poisoned)?;
        Ok(state.rows.get(&key).cloned())
    }

    fn scan(&self, kind: RecordKind) -> Result<Vec<Row>, StoreError> {
        let state = self.state.read().map_err(Self::poisoned)?;
        let mut rows: Vec<(RecordKey, Row)> = state
            .rows
            .iter()
            .filter(|(key, _)| key.kind() == kind)
            .map(|(key, row)| (*key, row.clone()))
            .collect();
        rows.sort_by_key(|(key, _)| *key);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    fn load_ledger(&self, product_id: ProductId) -> Result<Vec<StoredEntry>, StoreError> {
        let state = self.state.read().map_err(Self::poisoned)?;
        Ok(state.ledgers.get(&product_id).cloned().unwrap_or_default())
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        if changes.is_empty() {
            return Ok(CommitReceipt::default());
        }

        let mut state = self.state.write().map_err(Self::poisoned)?;

        // 1) Every write must be backed by a read (blind writes cannot be validated).
        for write in &changes.writes {
            if !changes.reads.contains_key(&write.key) {
                return Err(StoreError::InvalidCommit(format!(
                    "write to {} without a recorded read",
                    write.key
                )));
            }
        }
        for entry in &changes.entries {
            if !changes.ledger_reads.contains_key(&entry.product_id) {
                return Err(StoreError::InvalidCommit(format!(
                    "ledger append for product {} without a recorded read",
                    entry.product_id
                )));
            }
        }

        // 2) Optimistic checks on records and ledgers.
        for (key, seen) in &changes.reads {
            let current = state.rows.get(key).map(|r| r.version).unwrap_or(0);
            if current != *seen {
                return Err(StoreError::Conflict(format!(
                    "{key} changed (seen version {seen}, found {current})"
                )));
            }
        }
        for (product_id, expected) in &changes.ledger_reads {
            let current = state
                .ledgers
                .get(product_id)
                .map(|s| Self::ledger_version(s))
                .unwrap_or(0);
            if !expected.matches(current) {
                return Err(StoreError::Conflict(format!(
                    "ledger of product {product_id} changed \
                     (expected {expected:?}, found {current})"
                )));
            }
        }

        // 3) Unique constraints on the state as it would look after the writes.
        check_unique_constraints(&state.rows, &changes)?;

        // 4) Apply (nothing below can fail).
        let mut records_written = 0;
        for write in changes.writes {
            let current = state.rows.get(&write.key).map(|r| r.version).unwrap_or(0);
            match write.change {
                Change::Put(record) => {
                    state.rows.insert(
                        write.key,
                        Row {
                            version: current + 1,
                            record,
                        },
                    );
                    records_written += 1;
                }
                Change::Delete => {
                    if state.rows.remove(&write.key).is_some() {
                        records_written += 1;
                    }
                }
                Change::Touch => {
                    if let Some(row) = state.rows.get_mut(&write.key) {
                        row.version += 1;
                    }
                }
            }
        }

        let mut committed = Vec::with_capacity(changes.entries.len());
        for e in changes.entries {
            let stream = state.ledgers.entry(e.product_id).or_default();
            let stored = StoredEntry {
                entry_id: e.entry_id,
                product_id: e.product_id,
                sequence_number: Self::ledger_version(stream) + 1,
                entry_type: e.entry_type,
                entry_version: e.entry_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(CommitReceipt {
            records_written,
            entries: committed,
        })
    }
}

/// Reject a change set that would leave two active users with the same username or
/// two carts for the same user.
fn check_unique_constraints(
    rows: &HashMap<RecordKey, Row>,
    changes: &ChangeSet,
) -> Result<(), StoreError> {
    let rewritten: HashSet<RecordKey> = changes
        .writes
        .iter()
        .filter(|w| !matches!(w.change, Change::Touch))
        .map(|w| w.key)
        .collect();

    let after = rows
        .iter()
        .filter(|(key, _)| !rewritten.contains(key))
        .map(|(_, row)| &row.record)
        .chain(changes.writes.iter().filter_map(|w| match &w.change {
            Change::Put(record) => Some(record),
            _ => None,
        }));

    let mut usernames = HashSet::new();
    let mut cart_owners = HashSet::new();
    for record in after {
        match record {
            Record::User(user) if !user.is_deleted() => {
                if !usernames.insert(user.username()) {
                    return Err(StoreError::UniqueViolation(format!(
                        "username '{}' is taken",
                        user.username()
                    )));
                }
            }
            Record::Cart(cart) => {
                if !cart_owners.insert(cart.user_id()) {
                    return Err(StoreError::UniqueViolation(format!(
                        "user {} already has a cart",
                        cart.user_id()
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
