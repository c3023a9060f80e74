use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::latch::Latch;

/// Mutable state of a record, guarded by the record latch.
pub struct RecordCore<V> {
    /// User value. `None` until the first write is installed.
    pub value: Option<V>,
    /// Version counter; bumped by every committing writer.
    pub version: u64,
    /// Set by the first installed write and never cleared. A record that
    /// is not yet valid is a phantom: it exists structurally in a leaf
    /// but carries no committed value.
    pub valid: bool,
}

/// Record slot pointed to by leaf pages.
///
/// The key copy is immutable after creation and safe to read without the
/// latch; everything else lives behind [`RecordCore`]. Records are shared
/// between the owning leaf and in-flight transactions through `Arc`, so
/// nothing is reclaimed while a transaction still remembers the slot.
pub struct Record<K, V> {
    key: K,
    latch: Latch<RecordCore<V>>,
}

impl<K, V> Record<K, V> {
    pub(crate) fn new(key: K) -> Arc<Self> {
        Arc::new(Self {
            key,
            latch: Latch::new(RecordCore {
                value: None,
                version: 0,
                valid: false,
            }),
        })
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Acquires the record read latch, blocking.
    pub(crate) fn read(self: &Arc<Self>) -> RecordReadGuard<K, V> {
        self.latch.lock_shared();
        RecordReadGuard {
            record: Arc::clone(self),
            _not_send: PhantomData,
        }
    }

    /// Attempts the record read latch without blocking. `None` means some
    /// writer currently holds the latch.
    pub(crate) fn try_read(self: &Arc<Self>) -> Option<RecordReadGuard<K, V>> {
        if self.latch.try_lock_shared() {
            Some(RecordReadGuard {
                record: Arc::clone(self),
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Acquires the record write latch, blocking.
    pub(crate) fn write(self: &Arc<Self>) -> RecordWriteGuard<K, V> {
        self.latch.lock_exclusive();
        RecordWriteGuard {
            record: Arc::clone(self),
            _not_send: PhantomData,
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Record<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record").field("key", &self.key).finish()
    }
}

/// Shared guard over a record's core; keeps the record alive while held.
pub(crate) struct RecordReadGuard<K, V> {
    record: Arc<Record<K, V>>,
    _not_send: PhantomData<*const ()>,
}

impl<K, V> Deref for RecordReadGuard<K, V> {
    type Target = RecordCore<V>;

    fn deref(&self) -> &RecordCore<V> {
        unsafe { self.record.latch.data() }
    }
}

impl<K, V> Drop for RecordReadGuard<K, V> {
    fn drop(&mut self) {
        unsafe { self.record.latch.unlock_shared() }
    }
}

/// Exclusive guard over a record's core.
pub(crate) struct RecordWriteGuard<K, V> {
    record: Arc<Record<K, V>>,
    _not_send: PhantomData<*const ()>,
}

impl<K, V> Deref for RecordWriteGuard<K, V> {
    type Target = RecordCore<V>;

    fn deref(&self) -> &RecordCore<V> {
        unsafe { self.record.latch.data() }
    }
}

impl<K, V> DerefMut for RecordWriteGuard<K, V> {
    fn deref_mut(&mut self) -> &mut RecordCore<V> {
        unsafe { self.record.latch.data_mut() }
    }
}

impl<K, V> Drop for RecordWriteGuard<K, V> {
    fn drop(&mut self) {
        unsafe { self.record.latch.unlock_exclusive() }
    }
}
