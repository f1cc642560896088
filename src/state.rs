//! Process-wide one-time initialization.
//!
//! Grounded on the teacher's `LazyLock`
//! (`examples/greatbridf-osdev/crates/eonix_sync/src/lazy_lock.rs`): a
//! double-checked, race-free lazy singleton. This crate is `std`, so the
//! standard library's own `OnceLock` (stable since 1.70) plays the same
//! role instead of a hand-rolled atomic state machine.

use std::sync::OnceLock;

use crate::fault;
use crate::registry::Registry;
use crate::sys;

/// Everything the library needs process-wide: the page size (queried once),
/// the Registry, and the installed fault handler (a side effect of
/// initialization, not stored data).
pub struct GlobalState {
    pub registry: Registry,
}

static STATE: OnceLock<GlobalState> = OnceLock::new();

/// Get (initializing on first call, idempotently and thread-safely against
/// concurrent first calls) the process-wide state.
pub fn global() -> &'static GlobalState {
    STATE.get_or_init(|| {
        // Force page-size discovery before anything else touches it.
        let _ = sys::page_size();

        let state = GlobalState {
            registry: Registry::new(),
        };

        state
    });

    let state = STATE.get().expect("GlobalState initialized above");

    // The fault handler needs a `&'static Registry`, which only exists once
    // `STATE` itself is the one-time-initialized static; install it here,
    // also behind `OnceLock`'s own one-time guarantee via a nested guard so
    // concurrent first calls still only install once.
    static HANDLER_INSTALLED: OnceLock<()> = OnceLock::new();
    HANDLER_INSTALLED.get_or_init(|| fault::install(&state.registry));

    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_state_is_idempotent() {
        let a = global() as *const GlobalState;
        let b = global() as *const GlobalState;
        assert_eq!(a, b);
    }
}
