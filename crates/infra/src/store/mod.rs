//! Transactional record store with append-only stock ledgers.
//!
//! This module defines the storage boundary used by [`crate::transaction`]:
//! versioned record rows plus one ledger stream per product, committed
//! together or not at all.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use r#trait::{
    Change, ChangeSet, CommitReceipt, Record, RecordKey, RecordKind, Row, Store, StoreError,
    StoredEntry, StoredRecord, UncommittedEntry, Write,
};
