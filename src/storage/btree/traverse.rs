//! Root-to-leaf traversal with latch crabbing (lock coupling).
//!
//! Read mode couples shared latches parent to child and leaves only the
//! final leaf latched. Write mode couples exclusive latches and releases
//! every held ancestor whenever it reaches a child that cannot overflow
//! from one more insertion (`num_keys < degree - 1`), so the returned
//! guard list is exactly the set of pages an ensuing split may touch.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use crate::error::Result;
use crate::storage::page::{Page, PageReadGuard, PageWriteGuard};
use crate::txn::TxnCtx;

/// Still-latched pages in root-to-leaf order, ending at the leaf.
pub(crate) type HeldGuards<K, V> = SmallVec<[PageWriteGuard<K, V>; 8]>;

/// Read-mode crab to the leaf covering `key`. Invokes the read traversal
/// hook on each internal page right before its latch is released; the
/// caller is responsible for the hook on the returned leaf.
pub(super) fn crab_to_leaf_read<K, V>(
    root: &Arc<Page<K, V>>,
    key: &K,
    mut txn: Option<&mut TxnCtx<K, V>>,
) -> Result<PageReadGuard<K, V>>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone,
{
    let mut guard = root.read();
    loop {
        if guard.is_leaf() {
            return Ok(guard);
        }
        let child = guard.child_for(key)?;
        let child_guard = child.read();
        if let Some(t) = txn.as_deref_mut() {
            t.exec_read_traverse_node(guard.page(), &guard);
        }
        trace!(page = ?Arc::as_ptr(guard.page()), "read crab release");
        drop(guard);
        guard = child_guard;
    }
}

/// Write-mode crab to the leaf covering `key`. Invokes the write
/// traversal hook on every ancestor released early; hooks for the pages
/// still held at return are the caller's responsibility.
pub(super) fn crab_to_leaf_write<K, V>(
    root: &Arc<Page<K, V>>,
    key: &K,
    mut txn: Option<&mut TxnCtx<K, V>>,
) -> Result<HeldGuards<K, V>>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone,
{
    let degree = root.degree();
    let mut held: HeldGuards<K, V> = SmallVec::new();
    held.push(root.write());
    loop {
        let last = held.last().expect("write crab holds at least the root");
        if last.is_leaf() {
            return Ok(held);
        }
        let child = last.child_for(key)?;
        let child_guard = child.write();
        // One more insertion cannot overflow a page holding fewer than
        // degree - 1 keys, so nothing above it can be forced to split.
        if child_guard.num_keys() < degree - 1 {
            for guard in held.drain(..) {
                if let Some(t) = txn.as_deref_mut() {
                    t.exec_write_traverse_node(guard.page(), guard.page().height());
                }
                trace!(page = ?Arc::as_ptr(guard.page()), "write crab early release");
            }
        }
        held.push(child_guard);
    }
}
