//! Transaction contexts and the concurrency-control hook surface.
//!
//! The protocols form a closed set, so the context is a plain sum and
//! every hot-path hook dispatches with a `match`. The NONE protocol has
//! no context at all: the store simply passes `None` to the tree, which
//! then reads and writes records directly under their latches.

mod silo;
mod silo_hv;

pub use silo::SiloTxn;
pub use silo_hv::SiloHvTxn;

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::storage::page::{Page, PageCore};
use crate::storage::record::Record;

/// Concurrency-control protocol selected at store open.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Protocol {
    /// No transactions; operations are individually latch-protected.
    None,
    /// Silo-style OCC with per-record validation.
    #[default]
    Silo,
    /// Silo with hierarchical (subtree-level) validation for scans.
    SiloHv,
}

/// Commit decision returned by `FinishTxn`.
#[derive(Clone, Copy, Debug)]
pub struct TxnOutcome {
    pub committed: bool,
    /// Serialization order fetched at the commit's serialization point,
    /// when the caller supplied a counter and the commit reached it.
    pub ser_order: Option<u64>,
}

/// Per-transaction context. Thread-local by construction: contexts are
/// never shared and hold no latches between operations.
pub enum TxnCtx<K, V> {
    Silo(SiloTxn<K, V>),
    SiloHv(SiloHvTxn<K, V>),
}

pub(crate) fn record_addr<K, V>(record: &Arc<Record<K, V>>) -> usize {
    Arc::as_ptr(record) as usize
}

pub(crate) fn page_addr<K, V>(page: &Arc<Page<K, V>>) -> usize {
    Arc::as_ptr(page) as usize
}

impl<K, V> TxnCtx<K, V>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone,
{
    pub(crate) fn new_silo() -> Self {
        Self::Silo(SiloTxn::new())
    }

    pub(crate) fn new_silo_hv(no_read_validation: bool) -> Self {
        Self::SiloHv(SiloHvTxn::new(no_read_validation))
    }

    /// Captures a record read. Returns the visible value, or `None` for a
    /// phantom (a record injected by another transaction whose value was
    /// never committed and that this transaction has not written).
    pub(crate) fn exec_read_record(&mut self, record: &Arc<Record<K, V>>) -> Option<V> {
        match self {
            Self::Silo(txn) => txn.exec_read_record(record),
            Self::SiloHv(txn) => txn.exec_read_record(record),
        }
    }

    /// Buffers a write locally; the record itself is untouched until the
    /// commit's install phase.
    pub(crate) fn exec_write_record(&mut self, record: &Arc<Record<K, V>>, value: V) {
        match self {
            Self::Silo(txn) => txn.exec_write_record(record, value),
            Self::SiloHv(txn) => txn.exec_write_record(record, value),
        }
    }

    /// `core` is the latched content of `page`; the caller still holds
    /// the page's read latch while this hook runs.
    pub(crate) fn exec_read_traverse_node(&mut self, page: &Arc<Page<K, V>>, core: &PageCore<K, V>) {
        match self {
            Self::Silo(_) => {}
            Self::SiloHv(txn) => txn.exec_read_traverse_node(page, core),
        }
    }

    pub(crate) fn exec_write_traverse_node(&mut self, page: &Arc<Page<K, V>>, height: u32) {
        match self {
            Self::Silo(_) => {}
            Self::SiloHv(txn) => txn.exec_write_traverse_node(page, height),
        }
    }

    pub(crate) fn exec_enter_put(&mut self) {}
    pub(crate) fn exec_leave_put(&mut self) {}
    pub(crate) fn exec_enter_get(&mut self) {}
    pub(crate) fn exec_leave_get(&mut self) {}
    pub(crate) fn exec_enter_delete(&mut self) {}
    pub(crate) fn exec_leave_delete(&mut self) {}

    pub(crate) fn exec_enter_scan(&mut self) {
        match self {
            Self::Silo(_) => {}
            Self::SiloHv(txn) => txn.exec_enter_scan(),
        }
    }

    pub(crate) fn exec_leave_scan(&mut self) {
        match self {
            Self::Silo(_) => {}
            Self::SiloHv(txn) => txn.exec_leave_scan(),
        }
    }

    /// Runs the protocol's validation and install phases. Returns the
    /// commit decision plus the serialization order assigned at the
    /// serialization point, if a counter was supplied and it was reached.
    pub(crate) fn try_commit(&mut self, ser_counter: Option<&AtomicU64>) -> TxnOutcome {
        match self {
            Self::Silo(txn) => txn.try_commit(ser_counter),
            Self::SiloHv(txn) => txn.try_commit(ser_counter),
        }
    }
}
