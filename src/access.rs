//! The Access Engine: `create`, `destroy`, `read`, `write`, `clone_from`.
//!
//! The CoW-split-on-write logic is grounded on the teacher's
//! `examples/greatbridf-osdev/src/kernel/mem/mm_list/page_fault.rs`, adapted
//! from lazy hardware-fault-triggered CoW to this spec's eager software CoW
//! performed inline during `write` (no hardware fault is involved: the page
//! is explicitly unprotected for the access window first).

use std::thread::ThreadId;

use tracing::{debug, error, warn};

use crate::error::LsaError;
use crate::lsa::Lsa;
use crate::page::PageHandle;
use crate::state::global;
use crate::sys::{self, AccessMode};

pub fn create(size: u32) -> Result<(), LsaError> {
    let state = global();
    let tid = std::thread::current().id();

    if size == 0 {
        return Err(LsaError::InvalidSize);
    }
    if state.registry.contains(tid) {
        return Err(LsaError::AlreadyHasLsa);
    }

    let page_count = Lsa::page_count_for(size);
    let mut pages = Vec::with_capacity(page_count);
    for _ in 0..page_count {
        match PageHandle::alloc() {
            Some(page) => pages.push(page),
            None => {
                // Release hygiene: unmap pages already allocated for this
                // partial request rather than leaking them (SPEC_FULL.md
                // §4.2, §9 open question 1).
                drop(pages);
                warn!(size, "create: mmap failed, releasing partial allocation");
                return Err(LsaError::OutOfMemory);
            }
        }
    }

    debug!(tid = ?tid, size, page_count, "create");
    state.registry.insert(tid, Lsa::new(size, pages));
    Ok(())
}

pub fn destroy() -> Result<(), LsaError> {
    let state = global();
    let tid = std::thread::current().id();

    match state.registry.remove(tid) {
        Some(lsa) => {
            debug!(tid = ?tid, size = lsa.size(), "destroy");
            Ok(())
        }
        None => Err(LsaError::NoLsa),
    }
}

pub fn clone_from(src: ThreadId) -> Result<(), LsaError> {
    let state = global();
    let tid = std::thread::current().id();

    if state.registry.contains(tid) {
        return Err(LsaError::AlreadyHasLsa);
    }

    let cloned = state
        .registry
        .with_lsa(src, |src_lsa| {
            let pages: Vec<PageHandle> = src_lsa.pages().iter().map(PageHandle::clone).collect();
            Lsa::new(src_lsa.size(), pages)
        })
        .ok_or(LsaError::SourceHasNoLsa(src))?;

    debug!(tid = ?tid, src = ?src, size = cloned.size(), "clone_from");
    state.registry.insert(tid, cloned);
    Ok(())
}

pub fn read(offset: u32, length: u32, out: &mut [u8]) -> Result<(), LsaError> {
    let state = global();
    let tid = std::thread::current().id();

    if (out.len() as u64) < length as u64 {
        return Err(LsaError::BufferTooSmall);
    }

    state
        .registry
        .with_lsa(tid, |lsa| {
            check_range(lsa, offset, length)?;
            if length == 0 {
                return Ok(());
            }

            for page_idx in lsa.page_range(offset, length) {
                let page = &lsa.pages()[page_idx];
                let (start_in_page, len_in_page, buf_start) =
                    page_slice(page_idx, offset, length);

                // SAFETY: this page belongs to the calling thread's own LSA
                // and `registry_lock` is held for the duration of the
                // window, so no other thread can observe it unprotected.
                unsafe { page.unprotect(AccessMode::Read) };
                let src = unsafe {
                    std::slice::from_raw_parts(
                        page.base().as_ptr().add(start_in_page),
                        len_in_page,
                    )
                };
                out[buf_start..buf_start + len_in_page].copy_from_slice(src);
                // SAFETY: closing the window we just opened above.
                unsafe { page.protect_none() };
            }

            Ok(())
        })
        .ok_or(LsaError::NoLsa)?
}

pub fn write(offset: u32, length: u32, data: &[u8]) -> Result<(), LsaError> {
    let state = global();
    let tid = std::thread::current().id();

    if (data.len() as u64) < length as u64 {
        return Err(LsaError::BufferTooSmall);
    }

    state
        .registry
        .with_lsa_mut(tid, |lsa| {
            check_range(lsa, offset, length)?;
            if length == 0 {
                return Ok(());
            }

            let page_range = lsa.page_range(offset, length);
            for page_idx in page_range {
                let (start_in_page, len_in_page, buf_start) =
                    page_slice(page_idx, offset, length);

                // SAFETY: own LSA, `registry_lock` held for the window.
                unsafe { lsa.pages()[page_idx].unprotect(AccessMode::ReadWrite) };

                if lsa.pages()[page_idx].refcount() > 1 {
                    let old = &lsa.pages()[page_idx];
                    let new_page = old.cow_split().unwrap_or_else(|| {
                        // `old` is already open for `PROT_READ|WRITE` and
                        // there is no recoverable way to get back to every
                        // live page being `PROT_NONE` outside a window, so
                        // this is fatal to the process, the same as an
                        // `mprotect` failure in `sys::set_protection`, not a
                        // returned `LsaError::OutOfMemory`.
                        error!(
                            tid = ?tid,
                            page_idx,
                            "mmap failed during copy-on-write split, aborting process"
                        );
                        panic!("mmap failed during copy-on-write split");
                    });
                    debug!(
                        tid = ?tid,
                        page_idx,
                        old_refcount = old.refcount(),
                        "write: copy-on-write split"
                    );
                    // SAFETY: no other thread can be mid-window on `old`
                    // while we hold `registry_lock`, and we are replacing
                    // our own LSA's reference to it.
                    unsafe { old.protect_none() };
                    lsa.pages_mut()[page_idx] = new_page;
                }

                let page = &lsa.pages()[page_idx];
                let dst = unsafe {
                    std::slice::from_raw_parts_mut(
                        page.base().as_ptr().add(start_in_page),
                        len_in_page,
                    )
                };
                dst.copy_from_slice(&data[buf_start..buf_start + len_in_page]);
                // SAFETY: closing the window opened above (or, after a CoW
                // split, the window `cow_split` opened on the new page).
                unsafe { page.protect_none() };
            }

            Ok(())
        })
        .ok_or(LsaError::NoLsa)?
}

#[cfg(feature = "test-support")]
pub fn debug_page_address(offset: u32) -> Result<usize, LsaError> {
    let state = global();
    let tid = std::thread::current().id();

    state
        .registry
        .with_lsa(tid, |lsa| {
            check_range(lsa, offset, 1)?;
            let (page_idx, _) = lsa.locate(offset);
            Ok(lsa.pages()[page_idx].address())
        })
        .ok_or(LsaError::NoLsa)?
}

fn check_range(lsa: &Lsa, offset: u32, length: u32) -> Result<(), LsaError> {
    let end = offset.checked_add(length).ok_or(LsaError::OutOfRange)?;
    if end > lsa.size() {
        return Err(LsaError::OutOfRange);
    }
    Ok(())
}

/// For page `page_idx`, within the access `[offset, offset+length)`: the
/// byte offset inside the page to start at, how many bytes of this page are
/// touched, and where in the caller's buffer those bytes land.
fn page_slice(page_idx: usize, offset: u32, length: u32) -> (usize, usize, usize) {
    let page_size = sys::page_size() as u32;
    let page_start = page_idx as u32 * page_size;
    let page_end = page_start + page_size;
    let access_end = offset + length;

    let start = offset.max(page_start);
    let end = access_end.min(page_end);

    let start_in_page = (start - page_start) as usize;
    let len_in_page = (end - start) as usize;
    let buf_start = (start - offset) as usize;

    (start_in_page, len_in_page, buf_start)
}
