//! A lock-free, atomically swapped snapshot slot.
//!
//! Ported from the teacher's `examples/greatbridf-osdev/src/sync/arcswap.rs`
//! (itself built on `alloc::sync::Arc` + `AtomicPtr`, for `no_std`) to
//! `std::sync::Arc`. The Registry uses one of these to publish a snapshot of
//! live pages that the Fault Router can read without taking
//! `registry_lock` (see `registry.rs`).
//!
//! Unlike a general-purpose arc-swap, `swap` here never reclaims the value
//! it replaces: a previously published value is leaked and kept valid for
//! the remainder of the process. That is deliberate. The Fault Router reads
//! through [`load`](ArcSwap::load) from signal context, where reconstructing
//! an owning `Arc` (bumping and later dropping a strong count) risks being
//! the thread that drops the last reference and calls into the allocator —
//! not async-signal-safe. Reading a plain borrow of a value that can never
//! be freed out from under it sidesteps the problem entirely.

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

pub struct ArcSwap<T> {
    pointer: AtomicPtr<T>,
}

impl<T> ArcSwap<T> {
    pub fn new(data: T) -> Self {
        let pointer = Arc::into_raw(Arc::new(data));
        Self {
            pointer: AtomicPtr::new(pointer as *mut T),
        }
    }

    /// Publish a new value. The value this replaces is intentionally never
    /// reclaimed — see the module docs — so a concurrent [`load`](Self::load)
    /// can never race a `free()` of the slot it is reading.
    pub fn swap(&self, data: Arc<T>) {
        let new_pointer = Arc::into_raw(data);
        self.pointer.store(new_pointer as *mut _, Ordering::Release);
    }

    /// Borrow the currently published value. Safe to call from a signal
    /// handler: no refcount is touched, so nothing can be freed as a result
    /// of this call, here or anywhere else.
    pub fn load(&self) -> &T {
        let ptr = self.pointer.load(Ordering::Acquire);
        // SAFETY: `ptr` was published by `new` or `swap`, is never null, and
        // — since `swap` never reclaims a previously published value — stays
        // valid for the rest of the process once published.
        unsafe { &*ptr }
    }
}

impl<T> Drop for ArcSwap<T> {
    fn drop(&mut self) {
        // SAFETY: reclaims only the currently published value; everything
        // `swap` replaced earlier was already intentionally leaked above.
        unsafe {
            let ptr = self.pointer.load(Ordering::Acquire);
            drop(Arc::from_raw(ptr));
        }
    }
}

impl<T> Debug for ArcSwap<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ArcSwap {{ {:?} }}", self.load())
    }
}
