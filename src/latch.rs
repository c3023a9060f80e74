#![allow(unsafe_code)]

//! Reader-writer latch primitive for pages and records.
//!
//! A [`Latch`] fuses a raw reader-writer lock with the state it protects.
//! Unlike `RwLock`, it hands out no lifetime-bound guards of its own;
//! instead the page and record modules build *owned* guards on top of the
//! raw surface, each holding an `Arc` to the latched node and releasing
//! on drop. That gives latch crabbing its token discipline: releasing an
//! ancestor consumes its guard, so a page can never be unlocked twice.

use std::cell::UnsafeCell;

use parking_lot::lock_api::RawRwLock as _;
use parking_lot::RawRwLock;

pub(crate) struct Latch<T> {
    raw: RawRwLock,
    cell: UnsafeCell<T>,
}

// Same bounds as RwLock<T>: the latch hands out &T to concurrent readers
// and moves T across threads on drop.
unsafe impl<T: Send> Send for Latch<T> {}
unsafe impl<T: Send + Sync> Sync for Latch<T> {}

impl<T> Latch<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            raw: RawRwLock::INIT,
            cell: UnsafeCell::new(value),
        }
    }

    pub(crate) fn lock_shared(&self) {
        self.raw.lock_shared();
    }

    pub(crate) fn try_lock_shared(&self) -> bool {
        self.raw.try_lock_shared()
    }

    pub(crate) fn lock_exclusive(&self) {
        self.raw.lock_exclusive();
    }

    /// Safety: the current thread must hold a shared latch it has not
    /// released yet.
    pub(crate) unsafe fn unlock_shared(&self) {
        self.raw.unlock_shared();
    }

    /// Safety: the current thread must hold the exclusive latch.
    pub(crate) unsafe fn unlock_exclusive(&self) {
        self.raw.unlock_exclusive();
    }

    /// Safety: the caller must hold the latch (shared or exclusive).
    pub(crate) unsafe fn data(&self) -> &T {
        &*self.cell.get()
    }

    /// Safety: the caller must hold the exclusive latch.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut T {
        &mut *self.cell.get()
    }
}
