//! Thin wrappers over the POSIX primitives the rest of the crate builds on:
//! anonymous page mapping, protection changes, and page-size discovery.
//!
//! Grounded on `examples/other_examples/..._uffd.rs.rs` (raw `libc::mmap`
//! usage in a hosted Rust program) and `examples/original_source/tls.c`
//! (`tls_protect`/`tls_unprotect`, which this module's `protect`/`unprotect`
//! mirror one to one).

use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cached result of `sysconf(_SC_PAGESIZE)`. Populated once by `page_size()`.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Query the system's page size, caching the result.
///
/// `sysconf` is safe to call concurrently; at worst two threads redundantly
/// issue the same syscall and agree on the result, so no lock is needed.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    // SAFETY: `sysconf` with a valid name is always safe to call.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    assert!(size > 0, "sysconf(_SC_PAGESIZE) returned {size}");
    let size = size as usize;
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

/// Map one fresh anonymous, private page with `PROT_NONE` protection.
///
/// Returns `None` on `mmap` failure (`ENOMEM` is the expected case); the
/// caller is responsible for releasing any other pages from the same
/// multi-page request.
pub fn map_page(len: usize) -> Option<NonNull<u8>> {
    // SAFETY: `mmap` with `MAP_ANON | MAP_PRIVATE` and a null address hint
    // never touches caller-owned memory; we only inspect the return value.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        None
    } else {
        NonNull::new(ptr as *mut u8)
    }
}

/// Unmap a page previously returned by [`map_page`].
///
/// # Safety
/// `base` must be a pointer returned by `map_page` with the same `len`, not
/// already unmapped.
pub unsafe fn unmap_page(base: NonNull<u8>, len: usize) {
    let rc = unsafe { libc::munmap(base.as_ptr() as *mut libc::c_void, len) };
    assert_eq!(rc, 0, "munmap failed: {}", io::Error::last_os_error());
}

/// Set a page's protection to `PROT_NONE`. Fatal to the process on failure,
/// per the crate's error handling design: once `mprotect` fails mid-flight
/// we can no longer promise every live page is `PROT_NONE` outside a window.
///
/// # Safety
/// `base` must point at a page of at least `len` bytes obtained from
/// `map_page`.
pub unsafe fn protect_none(base: NonNull<u8>, len: usize) {
    set_protection(base, len, libc::PROT_NONE);
}

/// Protection mode requested for an access window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl AccessMode {
    fn bits(self) -> libc::c_int {
        match self {
            AccessMode::Read => libc::PROT_READ,
            AccessMode::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// Open an access window on a page with the given mode. Fatal to the process
/// on failure, for the same reason as [`protect_none`].
///
/// # Safety
/// `base` must point at a page of at least `len` bytes obtained from
/// `map_page`.
pub unsafe fn unprotect(base: NonNull<u8>, len: usize, mode: AccessMode) {
    set_protection(base, len, mode.bits());
}

unsafe fn set_protection(base: NonNull<u8>, len: usize, prot: libc::c_int) {
    let rc = unsafe { libc::mprotect(base.as_ptr() as *mut libc::c_void, len, prot) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        tracing::error!(?err, base = ?base.as_ptr(), prot, "mprotect failed, aborting process");
        panic!("mprotect failed: {err}");
    }
}
