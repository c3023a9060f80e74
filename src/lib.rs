//! Garner: an in-memory, transactional, ordered key/value store built
//! around a single concurrent B+-tree index.
//!
//! Clients open a [`Store`] with a chosen node fanout and
//! concurrency-control [`Protocol`], then issue transactions composed of
//! point reads, blind writes, and inclusive range scans. Commits are
//! optimistic: Silo validates every read record-by-record, while Silo-HV
//! additionally snapshots subtree version numbers so an untouched
//! subtree validates with a single check.
//!
//! Isolation is serializable for transactions composed of point
//! operations and repeatable read once a transaction scans (no phantom
//! protection: concurrent inserts into a scanned range neither abort the
//! scanner nor are guaranteed to appear).

pub mod error;
mod latch;
pub mod storage;
pub mod store;
pub mod txn;

pub use crate::error::{GarnerError, Result};
pub use crate::storage::btree::{BPTree, TreeStats};
pub use crate::store::{Store, StoreConfig};
pub use crate::txn::{Protocol, TxnCtx, TxnOutcome};
