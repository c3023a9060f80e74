//! Concurrent B+-tree index.
//!
//! One tree per store. All node access goes through per-page latches
//! acquired by lock coupling during descent; record values are guarded
//! by per-record latches so that page latches are never held while user
//! values move. Transactions observe traversal and record access through
//! the hook surface on `TxnCtx`; with no transaction the tree reads and
//! writes records directly under their latches.

mod split;
mod stats;
mod traverse;

#[cfg(test)]
mod tests;

pub use stats::TreeStats;

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{GarnerError, Result};
use crate::storage::page::{Page, PageSlots};
use crate::storage::record::Record;
use crate::txn::TxnCtx;

/// In-memory B+-tree. `degree` bounds the number of keys per page; a page
/// reaching `degree` keys splits before the operation that filled it
/// returns, so between operations every page holds fewer.
pub struct BPTree<K, V> {
    degree: usize,
    root: Arc<Page<K, V>>,
}

impl<K, V> fmt::Debug for BPTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BPTree").field("degree", &self.degree).finish()
    }
}

impl<K, V> BPTree<K, V>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone + fmt::Debug,
{
    /// Creates an empty tree. Fails for degrees that cannot host a split
    /// (`degree < 4`).
    pub fn new(degree: usize) -> Result<Self> {
        if degree < 4 {
            return Err(GarnerError::Config(format!(
                "degree parameter too small: {degree}"
            )));
        }
        Ok(Self {
            degree,
            root: Page::new_root(degree),
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub(crate) fn root(&self) -> &Arc<Page<K, V>> {
        &self.root
    }

    /// Inserts or overwrites `key`. With a transaction the new value is
    /// buffered in its write set; without one it is stored through the
    /// record write latch once all page latches are back down.
    pub fn put(&self, key: K, value: V, txn: Option<&mut TxnCtx<K, V>>) -> Result<()> {
        trace!(key = ?key, "put");
        let mut txn = txn;
        let mut held = traverse::crab_to_leaf_write(&self.root, &key, txn.as_deref_mut())?;

        let record = {
            let leaf = held.last_mut().expect("crab returns the latched leaf");
            debug_assert!(leaf.num_keys() < self.degree);
            let idx = leaf.search_key(&key);
            leaf.leaf_inject(idx, key)?
        };

        if held.last().expect("leaf latched").num_keys() >= self.degree {
            let at = held.len() - 1;
            split::split_page(self.degree, &mut held, at)?;
        }

        if let Some(t) = txn.as_deref_mut() {
            for guard in held.iter() {
                t.exec_write_traverse_node(guard.page(), guard.page().height());
            }
        }
        drop(held);

        match txn {
            Some(t) => t.exec_write_record(&record, value),
            None => {
                let mut guard = record.write();
                guard.value = Some(value);
                guard.valid = true;
            }
        }
        Ok(())
    }

    /// Looks up `key`. Returns `None` when the key is absent or (under a
    /// transaction) when the record is a phantom another transaction has
    /// injected but not committed.
    pub fn get(&self, key: &K, txn: Option<&mut TxnCtx<K, V>>) -> Result<Option<V>> {
        trace!(key = ?key, "get");
        let mut txn = txn;
        let leaf = traverse::crab_to_leaf_read(&self.root, key, txn.as_deref_mut())?;

        let record = match leaf.search_key(key) {
            Some(idx) if leaf.keys[idx] == *key => Arc::clone(&leaf.as_leaf()?.records[idx]),
            _ => {
                drop(leaf);
                return Ok(None);
            }
        };
        if let Some(t) = txn.as_deref_mut() {
            t.exec_read_traverse_node(leaf.page(), &leaf);
        }
        drop(leaf);

        Ok(read_record(&record, txn))
    }

    /// Inclusive range scan; appends `(key, value)` pairs to `results`
    /// and returns how many were appended. Walks the leaf sibling chain
    /// with read-latch coupling, so records already present are seen
    /// consistently; concurrent inserts into the range may or may not
    /// appear (no phantom protection).
    pub fn scan(
        &self,
        lkey: &K,
        rkey: &K,
        results: &mut Vec<(K, V)>,
        txn: Option<&mut TxnCtx<K, V>>,
    ) -> Result<usize> {
        trace!(lkey = ?lkey, rkey = ?rkey, "scan");
        if lkey > rkey {
            return Ok(0);
        }
        let mut txn = txn;
        let mut leaf = traverse::crab_to_leaf_read(&self.root, lkey, txn.as_deref_mut())?;
        if let Some(t) = txn.as_deref_mut() {
            t.exec_read_traverse_node(leaf.page(), &leaf);
        }

        let mut nrecords = 0;
        let mut first = true;
        loop {
            if leaf.num_keys() == 0 {
                // only the root may be empty, and only while it is the
                // sole leaf
                debug_assert!(leaf.page().is_root());
                drop(leaf);
                return Ok(nrecords);
            }

            let start = if first {
                match leaf.search_key(lkey) {
                    Some(idx) if leaf.keys[idx] == *lkey => idx,
                    Some(idx) => idx + 1,
                    None => 0,
                }
            } else {
                0
            };

            // This page bounds the scan if no sibling follows or the
            // right bound falls below the high key.
            let rightmost = match leaf.high_key() {
                None => true,
                Some(high) => rkey < high,
            };
            let end = if rightmost {
                match leaf.search_key(rkey) {
                    Some(idx) => idx + 1,
                    None => 0,
                }
            } else {
                leaf.num_keys()
            };

            for idx in start..end {
                let record = Arc::clone(&leaf.as_leaf()?.records[idx]);
                if let Some(value) = read_record(&record, txn.as_deref_mut()) {
                    results.push((leaf.keys[idx].clone(), value));
                    nrecords += 1;
                }
            }

            if rightmost {
                drop(leaf);
                return Ok(nrecords);
            }
            let next = match &leaf.as_leaf()?.next {
                Some(next) => Arc::clone(next),
                None => {
                    drop(leaf);
                    return Ok(nrecords);
                }
            };
            // Couple onto the sibling before letting this leaf go; the
            // chain only advances rightward, so this cannot deadlock.
            let next_guard = next.read();
            if let Some(t) = txn.as_deref_mut() {
                t.exec_read_traverse_node(next_guard.page(), &next_guard);
            }
            drop(leaf);
            leaf = next_guard;
            first = false;
        }
    }

    /// Removes `key` if present.
    pub fn delete(&self, _key: &K, _txn: Option<&mut TxnCtx<K, V>>) -> Result<bool> {
        Err(GarnerError::Unsupported("delete is not implemented"))
    }
}

/// Reads a record through the transaction hook, or directly under the
/// record read latch when no transaction is active. A record whose value
/// was never installed reads as absent either way.
fn read_record<K, V>(record: &Arc<Record<K, V>>, txn: Option<&mut TxnCtx<K, V>>) -> Option<V>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone,
{
    match txn {
        Some(t) => t.exec_read_record(record),
        None => {
            let guard = record.read();
            if guard.valid {
                guard.value.clone()
            } else {
                None
            }
        }
    }
}

impl<K, V> Drop for BPTree<K, V> {
    fn drop(&mut self) {
        // Unlink pages iteratively so dropping the root does not recurse
        // through arbitrarily long sibling chains.
        let mut pending: Vec<Arc<Page<K, V>>> = vec![Arc::clone(&self.root)];
        while let Some(page) = pending.pop() {
            let mut guard = page.write();
            match &mut guard.slots {
                PageSlots::Leaf(leaf) => {
                    leaf.next = None;
                    leaf.records.clear();
                }
                PageSlots::Internal(itnl) => {
                    itnl.next = None;
                    pending.append(&mut itnl.children);
                }
            }
        }
    }
}
