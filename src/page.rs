//! A single protected OS page, reference counted by hand.
//!
//! Grounded on the teacher's raw-pointer-plus-manual-refcount page
//! abstraction (`examples/greatbridf-osdev/src/kernel/mem/folio.rs`,
//! `crates/eonix_hal` `RawPage`): a `Page` here is *not* wrapped in
//! `std::sync::Arc`, because the refcount it carries is the CoW-sharer count
//! described by the spec, not Rust's own strong-count bookkeeping, and it
//! must be inspectable/mutable without allocating a new `Arc` each clone.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sys;

/// A single mapped, `PROT_NONE`-protected anonymous page.
struct PageInner {
    base: NonNull<u8>,
    refcount: AtomicUsize,
}

// SAFETY: `PageInner` is only ever reached through `PageHandle`, whose
// operations are themselves synchronized by `registry_lock` at the call
// sites that mutate `pages` arrays; the raw pointer is never dereferenced
// outside an access window.
unsafe impl Send for PageInner {}
unsafe impl Sync for PageInner {}

/// A manually reference-counted handle to a [`PageInner`].
///
/// Cloning a `PageHandle` increments the shared refcount (this is what makes
/// a page "shared" after `clone_from`); dropping the last handle unmaps and
/// frees the page.
pub struct PageHandle(NonNull<PageInner>);

// SAFETY: see the `Send`/`Sync` impls on `PageInner` above; `PageHandle`
// adds no additional non-thread-safe state, and is exactly what lets an LSA
// (and therefore a `Registry` entry) move to and be read from other
// threads, e.g. when the Fault Router's snapshot or a `clone_from` caller
// touches pages owned by a different thread's `Lsa`.
unsafe impl Send for PageHandle {}
unsafe impl Sync for PageHandle {}

impl PageHandle {
    /// Allocate a fresh, zero-initialized (by the kernel), `PROT_NONE` page
    /// with `refcount == 1`.
    pub fn alloc() -> Option<Self> {
        let base = sys::map_page(sys::page_size())?;
        let inner = Box::new(PageInner {
            base,
            refcount: AtomicUsize::new(1),
        });
        Some(Self(NonNull::from(Box::leak(inner))))
    }

    fn inner(&self) -> &PageInner {
        // SAFETY: `self.0` is always a live `Box::leak`'d allocation until
        // the last `PageHandle` referencing it is dropped.
        unsafe { self.0.as_ref() }
    }

    /// Base address of the underlying OS page.
    pub fn base(&self) -> NonNull<u8> {
        self.inner().base
    }

    /// Identity of the underlying page, stable across clones. Used by the
    /// Fault Router to match a faulting address against live pages.
    pub fn address(&self) -> usize {
        self.inner().base.as_ptr() as usize
    }

    /// Number of `PageHandle`s (equivalently, LSAs) currently sharing this
    /// page.
    pub fn refcount(&self) -> usize {
        self.inner().refcount.load(Ordering::Acquire)
    }

    /// Restore this page's protection to `PROT_NONE`.
    ///
    /// # Safety
    /// Must only be called while no access window referencing this page is
    /// open on any thread.
    pub unsafe fn protect_none(&self) {
        unsafe { sys::protect_none(self.base(), sys::page_size()) };
    }

    /// Open an access window on this page with the given mode.
    ///
    /// # Safety
    /// The caller must reprotect the page with [`protect_none`] before any
    /// other thread could observe it, and must hold `registry_lock` for the
    /// duration of the window.
    pub unsafe fn unprotect(&self, mode: sys::AccessMode) {
        unsafe { sys::unprotect(self.base(), sys::page_size(), mode) };
    }

    /// Create a fresh private copy of this page's contents, for use as the
    /// copy-on-write split target. The new page is handed back still open
    /// for writing so the caller can immediately write the byte that
    /// triggered the split.
    pub fn cow_split(&self) -> Option<Self> {
        let new_page = Self::alloc()?;
        // SAFETY: the new page was just allocated and is not reachable from
        // any other thread yet; opening it for write is exclusive to us.
        unsafe { new_page.unprotect(sys::AccessMode::ReadWrite) };
        // SAFETY: `self` is open for read for the duration of this call by
        // the caller's access window.
        let src = unsafe { std::slice::from_raw_parts(self.base().as_ptr(), sys::page_size()) };
        // SAFETY: `new_page` was just unprotected for write, above.
        let dst = unsafe {
            std::slice::from_raw_parts_mut(new_page.base().as_ptr(), sys::page_size())
        };
        dst.copy_from_slice(src);
        Some(new_page)
    }
}

impl Clone for PageHandle {
    fn clone(&self) -> Self {
        self.inner().refcount.fetch_add(1, Ordering::AcqRel);
        Self(self.0)
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        if self.inner().refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            // SAFETY: we just observed the refcount drop to zero, so no
            // other `PageHandle` can exist; we exclusively own this
            // allocation and its mapping.
            unsafe {
                let inner = Box::from_raw(self.0.as_ptr());
                sys::unmap_page(inner.base, sys::page_size());
            }
        }
    }
}
