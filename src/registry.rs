//! `ThreadId -> Lsa`, guarded by `registry_lock`, plus a lock-free snapshot
//! of live page addresses for the Fault Router.
//!
//! Grounded on the teacher's `MMList`
//! (`examples/greatbridf-osdev/src/kernel/mem/mm_list.rs`): a `Mutex`-guarded
//! table of areas with an `ArcSwap`-published snapshot half for readers that
//! must not take the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::arcswap::ArcSwap;
use crate::lsa::Lsa;

/// The process-wide registry. One instance lives inside `GlobalState`.
pub struct Registry {
    table: Mutex<HashMap<ThreadId, Lsa>>,
    /// Base addresses of every page currently owned by any live LSA.
    /// Rebuilt and republished every time `table` changes, while still
    /// holding `table`'s lock, so publication is itself linearized by
    /// `registry_lock`.
    live_pages: ArcSwap<Vec<usize>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            live_pages: ArcSwap::new(Vec::new()),
        }
    }

    /// Snapshot of every live page's base address, safe to read without
    /// `registry_lock` (used only by the Fault Router). Borrowed, not
    /// cloned: see `arcswap.rs` for why the Fault Router must never
    /// reconstruct an owning `Arc` over this value.
    pub fn live_pages_snapshot(&self) -> &Vec<usize> {
        self.live_pages.load()
    }

    fn rebuild_snapshot(&self, table: &HashMap<ThreadId, Lsa>) {
        let pages: Vec<usize> = table
            .values()
            .flat_map(|lsa| lsa.pages().iter().map(|p| p.address()))
            .collect();
        self.live_pages.swap(Arc::new(pages));
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.table.lock().unwrap().contains_key(&tid)
    }

    /// Insert a freshly built LSA for `tid`. Caller must have already
    /// checked `!contains(tid)`; this still asserts it, since a duplicate
    /// insert would silently orphan the previous LSA's pages.
    pub fn insert(&self, tid: ThreadId, lsa: Lsa) {
        let mut table = self.table.lock().unwrap();
        let prev = table.insert(tid, lsa);
        assert!(prev.is_none(), "registry: duplicate insert for {tid:?}");
        self.rebuild_snapshot(&table);
    }

    pub fn remove(&self, tid: ThreadId) -> Option<Lsa> {
        let mut table = self.table.lock().unwrap();
        let removed = table.remove(&tid);
        if removed.is_some() {
            self.rebuild_snapshot(&table);
        }
        removed
    }

    /// Run `f` with shared access to `tid`'s LSA, under `registry_lock`.
    pub fn with_lsa<R>(&self, tid: ThreadId, f: impl FnOnce(&Lsa) -> R) -> Option<R> {
        let table = self.table.lock().unwrap();
        table.get(&tid).map(f)
    }

    /// Run `f` with exclusive access to `tid`'s LSA, under `registry_lock`.
    /// `f` may mutate the LSA's `pages` array (CoW splits); the snapshot is
    /// rebuilt afterward since page identities may have changed.
    pub fn with_lsa_mut<R>(&self, tid: ThreadId, f: impl FnOnce(&mut Lsa) -> R) -> Option<R> {
        let mut table = self.table.lock().unwrap();
        let result = table.get_mut(&tid).map(f);
        if result.is_some() {
            self.rebuild_snapshot(&table);
        }
        result
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
