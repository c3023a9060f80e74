use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{GarnerError, Result};
use crate::latch::Latch;
use crate::storage::record::Record;

/// Leaf payload: records aligned with `keys`, plus the rightward sibling
/// chain and high key.
pub struct LeafSlots<K, V> {
    /// `keys[i]` belongs to `records[i]`.
    pub records: Vec<Arc<Record<K, V>>>,
    /// Right sibling at the leaf level, `None` for the right-most leaf.
    pub next: Option<Arc<Page<K, V>>>,
    /// Smallest key of the right sibling's subtree; `None` when right-most.
    pub high_key: Option<K>,
}

/// Internal payload: `children.len() == keys.len() + 1`. `children[0]`
/// covers keys `< keys[0]`, `children[i + 1]` covers `>= keys[i]`.
pub struct InternalSlots<K, V> {
    pub children: Vec<Arc<Page<K, V>>>,
    /// Right sibling at this internal level.
    pub next: Option<Arc<Page<K, V>>>,
    pub high_key: Option<K>,
}

/// Kind-dependent payload of a page. The root uses the leaf arm while the
/// tree has height 1 and the internal arm afterwards; its `Arc` identity
/// never changes across that switch.
pub enum PageSlots<K, V> {
    Leaf(LeafSlots<K, V>),
    Internal(InternalSlots<K, V>),
}

/// Latched content of a page.
pub struct PageCore<K, V> {
    /// Sorted, strictly ascending. Holds at most `degree` keys, and only
    /// transiently so: a page reaching `degree` keys splits before the
    /// enclosing operation returns.
    pub keys: Vec<K>,
    pub slots: PageSlots<K, V>,
}

/// B+-tree node.
///
/// The latch guards `keys` and `slots`; `hv_sem`/`hv_ver` are read and
/// written latch-free by the hierarchical-validation protocol, and
/// `height` only changes for the root (under its write latch).
pub struct Page<K, V> {
    root: bool,
    degree: usize,
    height: AtomicU32,
    /// Count of in-flight committers intending writes under this subtree.
    pub(crate) hv_sem: AtomicU64,
    /// Version installed by the last committed writer under this subtree.
    pub(crate) hv_ver: AtomicU64,
    latch: Latch<PageCore<K, V>>,
}

impl<K, V> Page<K, V> {
    fn alloc(root: bool, degree: usize, height: u32, slots: PageSlots<K, V>) -> Arc<Self> {
        Arc::new(Self {
            root,
            degree,
            height: AtomicU32::new(height),
            hv_sem: AtomicU64::new(0),
            hv_ver: AtomicU64::new(0),
            latch: Latch::new(PageCore {
                keys: Vec::with_capacity(degree),
                slots,
            }),
        })
    }

    /// Root page, starting life as the only leaf.
    pub(crate) fn new_root(degree: usize) -> Arc<Self> {
        Self::alloc(
            true,
            degree,
            1,
            PageSlots::Leaf(LeafSlots {
                records: Vec::with_capacity(degree),
                next: None,
                high_key: None,
            }),
        )
    }

    pub(crate) fn new_leaf(degree: usize) -> Arc<Self> {
        Self::alloc(
            false,
            degree,
            1,
            PageSlots::Leaf(LeafSlots {
                records: Vec::with_capacity(degree),
                next: None,
                high_key: None,
            }),
        )
    }

    pub(crate) fn new_internal(degree: usize, height: u32) -> Arc<Self> {
        Self::alloc(
            false,
            degree,
            height,
            PageSlots::Internal(InternalSlots {
                children: Vec::with_capacity(degree + 1),
                next: None,
                high_key: None,
            }),
        )
    }

    pub(crate) fn is_root(&self) -> bool {
        self.root
    }

    pub(crate) fn degree(&self) -> usize {
        self.degree
    }

    /// Height of this node; leaves are 1. Only the root's height ever
    /// changes, under the root write latch.
    pub(crate) fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    pub(crate) fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::Release);
    }

    /// Acquires the page latch in shared mode, blocking.
    pub(crate) fn read(self: &Arc<Self>) -> PageReadGuard<K, V> {
        self.latch.lock_shared();
        PageReadGuard {
            page: Arc::clone(self),
            _not_send: PhantomData,
        }
    }

    /// Acquires the page latch in exclusive mode, blocking.
    pub(crate) fn write(self: &Arc<Self>) -> PageWriteGuard<K, V> {
        self.latch.lock_exclusive();
        PageWriteGuard {
            page: Arc::clone(self),
            _not_send: PhantomData,
        }
    }
}

impl<K: Ord + Clone, V> PageCore<K, V> {
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.slots, PageSlots::Leaf(_))
    }

    /// Binary search for the index of the largest key `<= key`, or `None`
    /// when every key in the page is greater.
    pub fn search_key(&self, key: &K) -> Option<usize> {
        match self.keys.binary_search(key) {
            Ok(idx) => Some(idx),
            Err(0) => None,
            Err(ins) => Some(ins - 1),
        }
    }

    pub fn as_leaf(&self) -> Result<&LeafSlots<K, V>> {
        match &self.slots {
            PageSlots::Leaf(leaf) => Ok(leaf),
            PageSlots::Internal(_) => Err(GarnerError::Corruption(
                "expected leaf page, found internal".into(),
            )),
        }
    }

    pub fn as_leaf_mut(&mut self) -> Result<&mut LeafSlots<K, V>> {
        match &mut self.slots {
            PageSlots::Leaf(leaf) => Ok(leaf),
            PageSlots::Internal(_) => Err(GarnerError::Corruption(
                "expected leaf page, found internal".into(),
            )),
        }
    }

    pub fn as_internal(&self) -> Result<&InternalSlots<K, V>> {
        match &self.slots {
            PageSlots::Internal(itnl) => Ok(itnl),
            PageSlots::Leaf(_) => Err(GarnerError::Corruption(
                "expected internal page, found leaf".into(),
            )),
        }
    }

    pub fn as_internal_mut(&mut self) -> Result<&mut InternalSlots<K, V>> {
        match &mut self.slots {
            PageSlots::Internal(itnl) => Ok(itnl),
            PageSlots::Leaf(_) => Err(GarnerError::Corruption(
                "expected internal page, found leaf".into(),
            )),
        }
    }

    /// High key of this page, regardless of arm.
    pub fn high_key(&self) -> Option<&K> {
        match &self.slots {
            PageSlots::Leaf(leaf) => leaf.high_key.as_ref(),
            PageSlots::Internal(itnl) => itnl.high_key.as_ref(),
        }
    }

    /// Child covering `key`, i.e. `children[search_key(key) + 1]`.
    pub fn child_for(&self, key: &K) -> Result<Arc<Page<K, V>>> {
        let idx = self.search_key(key).map_or(0, |i| i + 1);
        let itnl = self.as_internal()?;
        itnl.children
            .get(idx)
            .cloned()
            .ok_or_else(|| GarnerError::Corruption("missing child page in traversal".into()))
    }

    /// Inserts `key` into a non-full leaf, or returns the record already
    /// holding it. `search_idx` must come from [`search_key`] on the same
    /// latched page. Never touches the record's value; that is the
    /// transaction's (or the caller's) job.
    ///
    /// [`search_key`]: PageCore::search_key
    pub fn leaf_inject(
        &mut self,
        search_idx: Option<usize>,
        key: K,
    ) -> Result<Arc<Record<K, V>>> {
        if let Some(idx) = search_idx {
            if self.keys[idx] == key {
                let leaf = self.as_leaf()?;
                return Ok(Arc::clone(&leaf.records[idx]));
            }
        }
        let at = search_idx.map_or(0, |i| i + 1);
        let nkeys = self.keys.len();
        let record = Record::new(key.clone());
        let leaf = self.as_leaf_mut()?;
        debug_assert_eq!(leaf.records.len(), nkeys);
        leaf.records.insert(at, Arc::clone(&record));
        self.keys.insert(at, key);
        Ok(record)
    }

    /// Inserts a separator and its right child into a non-full internal
    /// page. The child already sitting left of the insertion slot must be
    /// `lchild`; a duplicate separator is a structural error.
    pub fn internal_inject(
        &mut self,
        search_idx: Option<usize>,
        key: K,
        lchild: &Arc<Page<K, V>>,
        rchild: Arc<Page<K, V>>,
    ) -> Result<()> {
        if let Some(idx) = search_idx {
            if self.keys[idx] == key {
                return Err(GarnerError::Corruption(
                    "duplicate internal page key detected".into(),
                ));
            }
        }
        let at = search_idx.map_or(0, |i| i + 1);
        let nkeys = self.keys.len();
        let itnl = self.as_internal_mut()?;
        debug_assert_eq!(itnl.children.len(), nkeys + 1);
        if !Arc::ptr_eq(&itnl.children[at], lchild) {
            return Err(GarnerError::Corruption(
                "left child page does not match inject slot".into(),
            ));
        }
        itnl.children.insert(at + 1, rchild);
        self.keys.insert(at, key);
        Ok(())
    }
}

impl<K: fmt::Debug, V> fmt::Debug for PageCore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.slots {
            PageSlots::Leaf(_) => "leaf",
            PageSlots::Internal(_) => "internal",
        };
        f.debug_struct("PageCore")
            .field("kind", &kind)
            .field("keys", &self.keys)
            .finish()
    }
}

/// Shared guard over a page's core; keeps the page alive while held.
pub(crate) struct PageReadGuard<K, V> {
    page: Arc<Page<K, V>>,
    _not_send: PhantomData<*const ()>,
}

impl<K, V> PageReadGuard<K, V> {
    pub(crate) fn page(&self) -> &Arc<Page<K, V>> {
        &self.page
    }
}

impl<K, V> Deref for PageReadGuard<K, V> {
    type Target = PageCore<K, V>;

    fn deref(&self) -> &PageCore<K, V> {
        unsafe { self.page.latch.data() }
    }
}

impl<K, V> Drop for PageReadGuard<K, V> {
    fn drop(&mut self) {
        unsafe { self.page.latch.unlock_shared() }
    }
}

/// Exclusive guard over a page's core.
pub(crate) struct PageWriteGuard<K, V> {
    page: Arc<Page<K, V>>,
    _not_send: PhantomData<*const ()>,
}

impl<K, V> PageWriteGuard<K, V> {
    pub(crate) fn page(&self) -> &Arc<Page<K, V>> {
        &self.page
    }
}

impl<K, V> Deref for PageWriteGuard<K, V> {
    type Target = PageCore<K, V>;

    fn deref(&self) -> &PageCore<K, V> {
        unsafe { self.page.latch.data() }
    }
}

impl<K, V> DerefMut for PageWriteGuard<K, V> {
    fn deref_mut(&mut self) -> &mut PageCore<K, V> {
        unsafe { self.page.latch.data_mut() }
    }
}

impl<K, V> Drop for PageWriteGuard<K, V> {
    fn drop(&mut self) {
        unsafe { self.page.latch.unlock_exclusive() }
    }
}
