//! Page splits.
//!
//! A page splits as soon as it reaches `degree` keys, while the write
//! crab's latches are still held. Splits cascade upward through the
//! still-latched ancestors; the root splits in place so its `Arc`
//! identity (the tree's entry point) never changes.

use std::fmt;
use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::error::{GarnerError, Result};
use crate::storage::btree::traverse::HeldGuards;
use crate::storage::page::{InternalSlots, Page, PageSlots, PageWriteGuard};

/// Splits the overflowing page at `held[at]`, cascading into parents as
/// long as the separator injection fills them too. `held` is the write
/// crab's root-to-leaf guard list; a page can only overflow if the crab
/// kept its parent latched, so every cascade target is present.
pub(super) fn split_page<K, V>(
    degree: usize,
    held: &mut HeldGuards<K, V>,
    mut at: usize,
) -> Result<()>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone,
{
    loop {
        if held[at].page().is_root() {
            split_root(degree, &mut held[at])?;
            return Ok(());
        }
        if at == 0 {
            return Err(GarnerError::Corruption(
                "page overflow without latched parent".into(),
            ));
        }
        split_nonroot(degree, held, at)?;
        if held[at - 1].num_keys() >= degree {
            at -= 1;
            continue;
        }
        return Ok(());
    }
}

/// Splits the root in place: its content moves into two fresh children,
/// the root keeps the single promoted separator, and the tree grows one
/// level.
fn split_root<K, V>(degree: usize, root: &mut PageWriteGuard<K, V>) -> Result<()>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone,
{
    let mid = root.num_keys() / 2;
    let height = root.page().height();

    if root.is_leaf() {
        debug!(nkeys = root.num_keys(), "splitting root leaf");
        let left = Page::new_leaf(degree);
        let right = Page::new_leaf(degree);
        {
            let mut lguard = left.write();
            let mut rguard = right.write();

            rguard.keys = root.keys.split_off(mid);
            lguard.keys = mem::take(&mut root.keys);
            let separator = rguard.keys[0].clone();

            let root_leaf = root.as_leaf_mut()?;
            let rleaf = rguard.as_leaf_mut()?;
            rleaf.records = root_leaf.records.split_off(mid);
            let lleaf = lguard.as_leaf_mut()?;
            lleaf.records = mem::take(&mut root_leaf.records);
            lleaf.next = Some(Arc::clone(&right));
            lleaf.high_key = Some(separator.clone());

            root.keys = vec![separator];
        }
        root.slots = PageSlots::Internal(InternalSlots {
            children: vec![left, right],
            next: None,
            high_key: None,
        });
    } else {
        debug!(nkeys = root.num_keys(), height, "splitting root internal");
        let left = Page::new_internal(degree, height);
        let right = Page::new_internal(degree, height);
        {
            let mut lguard = left.write();
            let mut rguard = right.write();

            rguard.keys = root.keys.split_off(mid + 1);
            let separator = root.keys.pop().expect("split point key present");
            lguard.keys = mem::take(&mut root.keys);

            let root_itnl = root.as_internal_mut()?;
            let ritnl = rguard.as_internal_mut()?;
            ritnl.children = root_itnl.children.split_off(mid + 1);
            let litnl = lguard.as_internal_mut()?;
            litnl.children = mem::take(&mut root_itnl.children);
            litnl.next = Some(Arc::clone(&right));
            litnl.high_key = Some(separator.clone());

            root.keys = vec![separator];
        }
        let root_itnl = root.as_internal_mut()?;
        root_itnl.children = vec![left, right];
    }

    root.page().set_height(height + 1);
    Ok(())
}

/// Splits a non-root page into itself plus a new right sibling and
/// injects the promoted separator into the latched parent.
fn split_nonroot<K, V>(degree: usize, held: &mut HeldGuards<K, V>, at: usize) -> Result<()>
where
    K: Ord + Clone + fmt::Debug,
    V: Clone,
{
    let (ancestors, rest) = held.split_at_mut(at);
    let parent = ancestors.last_mut().expect("parent latched below root");
    let splitter = &mut rest[0];

    let mid = splitter.num_keys() / 2;
    let height = splitter.page().height();

    let (separator, right) = if splitter.is_leaf() {
        debug!(nkeys = splitter.num_keys(), "splitting leaf");
        let right = Page::new_leaf(degree);
        let mut rguard = right.write();

        rguard.keys = splitter.keys.split_off(mid);
        let separator = rguard.keys[0].clone();

        let sleaf = splitter.as_leaf_mut()?;
        let rleaf = rguard.as_leaf_mut()?;
        rleaf.records = sleaf.records.split_off(mid);
        rleaf.next = sleaf.next.take();
        rleaf.high_key = sleaf.high_key.replace(separator.clone());
        sleaf.next = Some(Arc::clone(&right));

        drop(rguard);
        (separator, right)
    } else {
        debug!(nkeys = splitter.num_keys(), height, "splitting internal");
        let right = Page::new_internal(degree, height);
        let mut rguard = right.write();

        rguard.keys = splitter.keys.split_off(mid + 1);
        let separator = splitter.keys.pop().expect("split point key present");

        let sitnl = splitter.as_internal_mut()?;
        let ritnl = rguard.as_internal_mut()?;
        ritnl.children = sitnl.children.split_off(mid + 1);
        ritnl.next = sitnl.next.take();
        ritnl.high_key = sitnl.high_key.replace(separator.clone());
        sitnl.next = Some(Arc::clone(&right));

        drop(rguard);
        (separator, right)
    };

    debug_assert!(parent.num_keys() < degree);
    let lchild = Arc::clone(splitter.page());
    let idx = parent.search_key(&separator);
    parent.internal_inject(idx, separator, &lchild, right)
}
