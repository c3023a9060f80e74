//! Store façade.
//!
//! Maps the public Put/Get/Delete/Scan surface onto tree operations
//! wrapped in either the caller's transaction or an implicit single-op
//! one, and dispatches to the configured concurrency-control protocol.

mod config;

pub use config::StoreConfig;

use std::fmt;
use std::sync::atomic::AtomicU64;

use tracing::debug;

use crate::error::Result;
use crate::storage::btree::{BPTree, TreeStats};
use crate::txn::{Protocol, TxnCtx, TxnOutcome};

/// In-memory transactional ordered key/value store over a single
/// concurrent B+-tree.
pub struct Store<K, V> {
    tree: BPTree<K, V>,
    config: StoreConfig,
}

impl<K, V> fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("config", &self.config).finish()
    }
}

impl<K, V> Store<K, V>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone + fmt::Debug,
{
    /// Opens a store. Fails with [`GarnerError::Config`] when the degree
    /// cannot host a split.
    ///
    /// [`GarnerError::Config`]: crate::error::GarnerError::Config
    pub fn open(config: StoreConfig) -> Result<Self> {
        let tree = BPTree::new(config.degree)?;
        debug!(degree = config.degree, protocol = ?config.protocol, "store opened");
        Ok(Self { tree, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn tree(&self) -> &BPTree<K, V> {
        &self.tree
    }

    /// Begins a transaction. `None` under [`Protocol::None`], where every
    /// operation is individually latch-protected instead.
    pub fn start_txn(&self) -> Option<TxnCtx<K, V>> {
        match self.config.protocol {
            Protocol::None => None,
            Protocol::Silo => Some(TxnCtx::new_silo()),
            Protocol::SiloHv => Some(TxnCtx::new_silo_hv(self.config.no_read_validation)),
        }
    }

    /// Validates and either installs or discards the transaction's
    /// effects. `ser_counter`, when supplied, is fetched-and-incremented
    /// at the serialization point so tests can reconstruct the
    /// equivalent serial order.
    pub fn finish_txn(
        &self,
        mut txn: TxnCtx<K, V>,
        ser_counter: Option<&AtomicU64>,
    ) -> TxnOutcome {
        txn.try_commit(ser_counter)
    }

    /// Inserts or overwrites a key. Returns the commit decision of the
    /// implicit transaction when `txn` is `None`; with an explicit
    /// transaction the write is only buffered and the result is `true`.
    pub fn put(&self, key: K, value: V, txn: Option<&mut TxnCtx<K, V>>) -> Result<bool> {
        match txn {
            Some(txn) => {
                txn.exec_enter_put();
                self.tree.put(key, value, Some(txn))?;
                txn.exec_leave_put();
                Ok(true)
            }
            None => match self.start_txn() {
                Some(mut txn) => {
                    txn.exec_enter_put();
                    self.tree.put(key, value, Some(&mut txn))?;
                    txn.exec_leave_put();
                    Ok(self.finish_txn(txn, None).committed)
                }
                None => {
                    self.tree.put(key, value, None)?;
                    Ok(true)
                }
            },
        }
    }

    /// Point lookup. Returns `(value, committed)`; the value is `None`
    /// when the key is absent (or only a phantom exists).
    pub fn get(&self, key: &K, txn: Option<&mut TxnCtx<K, V>>) -> Result<(Option<V>, bool)> {
        match txn {
            Some(txn) => {
                txn.exec_enter_get();
                let value = self.tree.get(key, Some(txn))?;
                txn.exec_leave_get();
                Ok((value, true))
            }
            None => match self.start_txn() {
                Some(mut txn) => {
                    txn.exec_enter_get();
                    let value = self.tree.get(key, Some(&mut txn))?;
                    txn.exec_leave_get();
                    let committed = self.finish_txn(txn, None).committed;
                    Ok((value, committed))
                }
                None => Ok((self.tree.get(key, None)?, true)),
            },
        }
    }

    /// Existence delete. Not implemented: always fails with
    /// [`GarnerError::Unsupported`], distinct from a transaction abort.
    ///
    /// [`GarnerError::Unsupported`]: crate::error::GarnerError::Unsupported
    pub fn delete(&self, key: &K, txn: Option<&mut TxnCtx<K, V>>) -> Result<bool> {
        match txn {
            Some(txn) => {
                txn.exec_enter_delete();
                let found = self.tree.delete(key, Some(txn));
                txn.exec_leave_delete();
                found
            }
            None => self.tree.delete(key, None),
        }
    }

    /// Inclusive range scan; appends to `results` and returns
    /// `(appended, committed)`. The result vector is append-only; callers
    /// may pre-clear it.
    pub fn scan(
        &self,
        lkey: &K,
        rkey: &K,
        results: &mut Vec<(K, V)>,
        txn: Option<&mut TxnCtx<K, V>>,
    ) -> Result<(usize, bool)> {
        match txn {
            Some(txn) => {
                txn.exec_enter_scan();
                let nrecords = self.tree.scan(lkey, rkey, results, Some(txn))?;
                txn.exec_leave_scan();
                Ok((nrecords, true))
            }
            None => match self.start_txn() {
                Some(mut txn) => {
                    txn.exec_enter_scan();
                    let nrecords = self.tree.scan(lkey, rkey, results, Some(&mut txn))?;
                    txn.exec_leave_scan();
                    let committed = self.finish_txn(txn, None).committed;
                    Ok((nrecords, committed))
                }
                None => Ok((self.tree.scan(lkey, rkey, results, None)?, true)),
            },
        }
    }

    /// Structural verification walk; see [`BPTree::gather_stats`].
    /// Single-threaded, for tests and diagnostics.
    pub fn gather_stats(&self, print_pages: bool) -> Result<TreeStats> {
        self.tree.gather_stats(print_pages)
    }
}

impl<K, V> Store<K, V> {
    /// Degree the store was opened with.
    pub fn degree(&self) -> usize {
        self.config.degree
    }
}
