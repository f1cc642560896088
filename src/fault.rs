//! The Fault Router: a process-wide `SIGSEGV`/`SIGBUS` handler that kills
//! only the thread that touched a live LSA page outside a sanctioned access
//! window.
//!
//! Grounded directly on `examples/original_source/tls.c`'s
//! `tls_handle_page_fault`/`tls_init`: mask the faulting address down to its
//! page, scan for a match, `pthread_exit` on hit, restore `SIG_DFL` and
//! `raise` again on miss.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::registry::Registry;
use crate::sys;

/// Registry the currently installed handler reads from. Set once by
/// `install`. A raw pointer (not an `Arc`) because the handler runs in
/// signal context and must not touch any refcount machinery that could
/// race with a non-reentrant drop; the registry this points to lives for
/// the rest of the process by construction (it is the process-wide
/// singleton in `GlobalState`, which is never torn down).
static ACTIVE_REGISTRY: AtomicPtr<Registry> = AtomicPtr::new(std::ptr::null_mut());

/// Install the `SIGSEGV`/`SIGBUS` handler. Must be called exactly once,
/// under `GlobalState`'s one-time initialization.
pub fn install(registry: &'static Registry) {
    ACTIVE_REGISTRY.store(registry as *const Registry as *mut Registry, Ordering::Release);

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle as usize;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut action.sa_mask);

        let rc = libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut());
        assert_eq!(rc, 0, "failed to install SIGSEGV handler");
        let rc = libc::sigaction(libc::SIGBUS, &action, std::ptr::null_mut());
        assert_eq!(rc, 0, "failed to install SIGBUS handler");
    }
}

/// The installed signal handler. Async-signal-safe: no allocation, no
/// locking, no formatted I/O. It only loads an already-built snapshot
/// (`Registry::live_pages_snapshot`, published under `registry_lock` by the
/// mutating side) and compares plain integers against it.
extern "C" fn handle(sig: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    let page_size = sys::page_size();
    // SAFETY: `info` is supplied by the kernel for an `SA_SIGINFO` handler
    // and is valid for the duration of this call.
    let fault_addr = unsafe { (*info).si_addr() as usize };
    let fault_page = fault_addr & !(page_size - 1);

    let registry_ptr = ACTIVE_REGISTRY.load(Ordering::Acquire);
    if !registry_ptr.is_null() {
        // SAFETY: `registry_ptr` points at the process-wide `Registry`
        // singleton, which outlives every signal delivery.
        let registry = unsafe { &*registry_ptr };
        let snapshot = registry.live_pages_snapshot();
        if snapshot.iter().any(|&base| base == fault_page) {
            // SAFETY: terminating only the current thread; `pthread_exit`
            // is the documented way to do this from a signal handler, and
            // is what the reference implementation does.
            unsafe { libc::pthread_exit(std::ptr::null_mut()) };
        }
    }

    // Not an LSA page: restore default disposition and re-raise so the
    // normal crash/debugger behavior applies, with the real address intact.
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}
