//! Structural verification walk and tree statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{GarnerError, Result};
use crate::storage::btree::BPTree;
use crate::storage::page::Page;

/// Snapshot of tree shape, gathered by [`BPTree::gather_stats`].
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct TreeStats {
    /// Root height; 1 while the root is the only leaf.
    pub height: u32,
    /// Total pages reachable from the root.
    pub npages: usize,
    /// Internal pages (the root counts here once the tree has height > 1).
    pub npages_itnl: usize,
    /// Leaf pages.
    pub npages_leaf: usize,
    /// Separator keys across internal pages.
    pub nkeys_itnl: usize,
    /// Keys across leaf pages.
    pub nkeys_leaf: usize,
}

struct LevelEntry<K> {
    addr: usize,
    next_addr: Option<usize>,
    min_key: Option<K>,
    high_key: Option<K>,
}

fn page_addr<K, V>(page: &Arc<Page<K, V>>) -> usize {
    Arc::as_ptr(page) as usize
}

impl<K, V> BPTree<K, V>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone + fmt::Debug,
{
    /// Depth-first walk validating the tree's structural invariants:
    /// strict key ordering, the fanout bound, child counts, high-key
    /// consistency against parent separators, and the per-level sibling
    /// chains. Single-threaded diagnostic; violations are `Corruption`.
    pub fn gather_stats(&self, print_pages: bool) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut levels: BTreeMap<u32, Vec<LevelEntry<K>>> = BTreeMap::new();
        stats.height = self.root().height();

        self.verify_subtree(
            self.root(),
            stats.height,
            None,
            print_pages,
            &mut stats,
            &mut levels,
        )?;

        for entries in levels.values() {
            for pair in entries.windows(2) {
                if pair[0].next_addr != Some(pair[1].addr) {
                    return Err(GarnerError::Corruption(
                        "sibling chain does not link to the next page at its level".into(),
                    ));
                }
                if pair[0].high_key != pair[1].min_key {
                    return Err(GarnerError::Corruption(
                        "high key does not equal smallest key of right sibling".into(),
                    ));
                }
            }
            let last = entries.last().expect("level never empty");
            if last.next_addr.is_some() {
                return Err(GarnerError::Corruption(
                    "right-most page at its level has a sibling link".into(),
                ));
            }
            if last.high_key.is_some() {
                return Err(GarnerError::Corruption(
                    "right-most page at its level has a high key".into(),
                ));
            }
        }

        info!(
            height = stats.height,
            npages = stats.npages,
            npages_itnl = stats.npages_itnl,
            npages_leaf = stats.npages_leaf,
            nkeys_itnl = stats.nkeys_itnl,
            nkeys_leaf = stats.nkeys_leaf,
            "tree stats"
        );
        Ok(stats)
    }

    /// Validates one page and its subtree; returns the smallest key of
    /// the subtree (`None` only for the empty root).
    fn verify_subtree(
        &self,
        page: &Arc<Page<K, V>>,
        expected_height: u32,
        expected_high: Option<&K>,
        print_pages: bool,
        stats: &mut TreeStats,
        levels: &mut BTreeMap<u32, Vec<LevelEntry<K>>>,
    ) -> Result<Option<K>> {
        let guard = page.read();

        if page.height() != expected_height {
            return Err(GarnerError::Corruption(format!(
                "page height {} does not match level {}",
                page.height(),
                expected_height
            )));
        }
        if guard.num_keys() >= self.degree() {
            return Err(GarnerError::Corruption(format!(
                "page holds {} keys at degree {}",
                guard.num_keys(),
                self.degree()
            )));
        }
        if !page.is_root() && guard.num_keys() == 0 {
            return Err(GarnerError::Corruption("empty non-root page".into()));
        }
        for pair in guard.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(GarnerError::Corruption("page keys out of order".into()));
            }
        }
        if guard.high_key() != expected_high {
            return Err(GarnerError::Corruption(
                "high key does not match parent separator".into(),
            ));
        }
        if guard.is_leaf() != (expected_height == 1) {
            return Err(GarnerError::Corruption(
                "page kind does not match its height".into(),
            ));
        }
        if print_pages {
            let core: &crate::storage::page::PageCore<K, V> = &guard;
            debug!(addr = page_addr(page), height = expected_height, page = ?core, "page");
        }

        stats.npages += 1;
        let (min_key, next_addr) = if guard.is_leaf() {
            let leaf = guard.as_leaf()?;
            if leaf.records.len() != guard.num_keys() {
                return Err(GarnerError::Corruption(
                    "leaf record count does not match key count".into(),
                ));
            }
            for (key, record) in guard.keys.iter().zip(&leaf.records) {
                if record.key() != key {
                    return Err(GarnerError::Corruption(
                        "record key does not match its leaf slot".into(),
                    ));
                }
            }
            stats.npages_leaf += 1;
            stats.nkeys_leaf += guard.num_keys();
            (
                guard.keys.first().cloned(),
                leaf.next.as_ref().map(page_addr),
            )
        } else {
            let itnl = guard.as_internal()?;
            if itnl.children.len() != guard.num_keys() + 1 {
                return Err(GarnerError::Corruption(
                    "internal child count is not keys + 1".into(),
                ));
            }
            stats.npages_itnl += 1;
            stats.nkeys_itnl += guard.num_keys();

            let mut subtree_min = None;
            for (idx, child) in itnl.children.iter().enumerate() {
                let child_high = if idx < guard.num_keys() {
                    Some(&guard.keys[idx])
                } else {
                    expected_high
                };
                let child_min = self
                    .verify_subtree(
                        child,
                        expected_height - 1,
                        child_high,
                        print_pages,
                        stats,
                        levels,
                    )?
                    .ok_or_else(|| GarnerError::Corruption("empty page below root".into()))?;
                if idx > 0 && child_min < guard.keys[idx - 1] {
                    return Err(GarnerError::Corruption(
                        "child keys fall below their left separator".into(),
                    ));
                }
                if idx == 0 {
                    subtree_min = Some(child_min);
                }
            }
            (subtree_min, itnl.next.as_ref().map(page_addr))
        };

        levels.entry(expected_height).or_default().push(LevelEntry {
            addr: page_addr(page),
            next_addr,
            min_key: min_key.clone(),
            high_key: guard.high_key().cloned(),
        });
        Ok(min_key)
    }
}
