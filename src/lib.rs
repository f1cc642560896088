//! Per-thread protected Local Storage Areas (LSAs) with copy-on-write
//! cloning.
//!
//! An LSA is a byte-addressable region, private to the thread that created
//! it, reachable only through [`create`], [`destroy`], [`read`], [`write`],
//! and [`clone_from`]. Its backing pages are kept `PROT_NONE` at every
//! instant outside one of those calls; any other access — a stray pointer
//! dereference, a leaked address, anything that isn't this API — faults,
//! and the faulting thread is terminated while the rest of the process
//! keeps running.
//!
//! `clone_from` gives the calling thread a copy-on-write view of another
//! thread's LSA: pages start out shared and are lazily split the first time
//! either side writes to them.
//!
//! See `SPEC_FULL.md` for the full design; `DESIGN.md` for how each part of
//! this crate is grounded in the repositories it was built from.

mod access;
mod arcswap;
mod error;
mod fault;
mod lsa;
mod page;
mod registry;
mod state;
mod sys;

pub use error::LsaError;

use std::thread::ThreadId;

/// Create a local storage area of at least `size` bytes for the calling
/// thread. Fails if `size == 0` or the calling thread already owns an LSA.
/// On success, the LSA's bytes are all zero.
pub fn create(size: u32) -> Result<(), LsaError> {
    access::create(size)
}

/// Destroy the calling thread's local storage area, releasing any pages not
/// still shared by a clone. Fails if the calling thread owns no LSA.
pub fn destroy() -> Result<(), LsaError> {
    access::destroy()
}

/// Read `length` bytes starting at `offset` from the calling thread's LSA
/// into `out[0..length]`. Fails if the calling thread owns no LSA, if
/// `out` is shorter than `length`, or if `offset + length` exceeds the
/// LSA's size.
pub fn read(offset: u32, length: u32, out: &mut [u8]) -> Result<(), LsaError> {
    access::read(offset, length, out)
}

/// Write `data[0..length]` into the calling thread's LSA starting at
/// `offset`, copy-on-write splitting any page shared with another thread's
/// LSA along the way. Fails under the same conditions as [`read`].
pub fn write(offset: u32, length: u32, data: &[u8]) -> Result<(), LsaError> {
    access::write(offset, length, data)
}

/// Give the calling thread a copy-on-write view of `src`'s local storage
/// area. Fails if the calling thread already owns an LSA, or if `src` owns
/// none.
pub fn clone_from(src: ThreadId) -> Result<(), LsaError> {
    access::clone_from(src)
}

/// Hand back the raw address of the page backing `offset` in the calling
/// thread's LSA, bypassing the protection regime entirely.
///
/// This exists only so integration tests can deliberately trigger the
/// Fault Router (SPEC_FULL.md §8 scenario 4/5); using the returned pointer
/// for anything other than a single intentional out-of-band read/write in a
/// disposable test thread defeats the entire point of this crate.
#[cfg(feature = "test-support")]
pub fn debug_page_address(offset: u32) -> Result<usize, LsaError> {
    access::debug_page_address(offset)
}

#[cfg(test)]
mod tests {
    //! Note: these tests share the process-wide Registry and fault handler
    //! (there is only one process). Tests that intentionally crash a thread
    //! (scenario 4/5 in SPEC_FULL.md §8) live in `tests/` as separate
    //! subprocess-driven integration tests instead, so a deliberately killed
    //! thread can't be mistaken for a test failure in this binary.

    use super::*;
    use std::sync::mpsc;
    use std::thread;

    /// Every test that calls into the library needs its own thread, since
    /// `destroy` leaves no trace but a thread that already created one LSA
    /// can never create a second.
    fn in_thread<F: FnOnce() + Send + 'static>(f: F) {
        thread::spawn(f).join().expect("test thread panicked");
    }

    #[test]
    fn create_read_zeros() {
        in_thread(|| {
            create(10).unwrap();
            let mut out = [0xffu8; 10];
            read(0, 10, &mut out).unwrap();
            assert_eq!(out, [0u8; 10]);
            destroy().unwrap();
        });
    }

    #[test]
    fn double_create_fails_but_original_still_usable() {
        in_thread(|| {
            create(100).unwrap();
            assert!(matches!(create(100), Err(LsaError::AlreadyHasLsa)));

            let mut out = [0u8; 4];
            read(0, 4, &mut out).unwrap();
            destroy().unwrap();
        });
    }

    #[test]
    fn create_zero_fails() {
        in_thread(|| {
            assert!(matches!(create(0), Err(LsaError::InvalidSize)));
        });
    }

    #[test]
    fn destroy_without_create_fails() {
        in_thread(|| {
            assert!(matches!(destroy(), Err(LsaError::NoLsa)));
        });
    }

    #[test]
    fn read_without_create_fails() {
        in_thread(|| {
            let mut out = [0u8; 1];
            assert!(matches!(read(0, 1, &mut out), Err(LsaError::NoLsa)));
        });
    }

    #[test]
    fn write_then_read_round_trip() {
        in_thread(|| {
            create(64).unwrap();
            let data = b"hello, local storage area!!!!!!".to_vec();
            write(0, data.len() as u32, &data).unwrap();

            let mut out = vec![0u8; data.len()];
            read(0, data.len() as u32, &mut out).unwrap();
            assert_eq!(out, data);
            destroy().unwrap();
        });
    }

    #[test]
    fn out_of_range_read_and_write_fail() {
        in_thread(|| {
            create(8).unwrap();
            let mut out = [0u8; 1];
            assert!(matches!(read(8, 1, &mut out), Err(LsaError::OutOfRange)));
            assert!(matches!(read(7, 1, &mut out), Ok(())));
            assert!(matches!(write(8, 1, &[0]), Err(LsaError::OutOfRange)));

            // Overflowing offset + length must not panic or wrap around.
            assert!(matches!(
                read(u32::MAX, 2, &mut out),
                Err(LsaError::OutOfRange)
            ));
            destroy().unwrap();
        });
    }

    #[test]
    fn cross_page_write_touches_both_pages() {
        in_thread(|| {
            create(8000).unwrap();
            write(4094, 4, b"ABCD").unwrap();

            let mut out = [0u8; 4];
            read(4094, 4, &mut out).unwrap();
            assert_eq!(&out, b"ABCD");
            destroy().unwrap();
        });
    }

    #[test]
    fn clone_without_source_fails() {
        in_thread(|| {
            let fake_src = thread::spawn(|| thread::current().id())
                .join()
                .unwrap();
            assert!(matches!(
                clone_from(fake_src),
                Err(LsaError::SourceHasNoLsa(_))
            ));
        });
    }

    #[test]
    fn clone_already_has_lsa_fails() {
        in_thread(|| {
            create(16).unwrap();
            let self_id = thread::current().id();
            assert!(matches!(clone_from(self_id), Err(LsaError::AlreadyHasLsa)));
            destroy().unwrap();
        });
    }

    #[test]
    fn cow_clone_diverges_on_write() {
        let (src_tid_tx, src_tid_rx) = mpsc::channel();
        let (go_clone_tx, go_clone_rx) = mpsc::channel::<()>();
        let (clone_done_tx, clone_done_rx) = mpsc::channel::<()>();

        let src = thread::spawn(move || {
            create(8192).unwrap();
            write(0, 8192, &vec![b'X'; 8192]).unwrap();
            src_tid_tx.send(thread::current().id()).unwrap();

            go_clone_rx.recv().unwrap();
            // Hold the LSA open while the clone thread does its own writes.
            clone_done_rx.recv().unwrap();

            let mut out = [0u8; 1];
            read(0, 1, &mut out).unwrap();
            assert_eq!(out[0], b'X', "source page must be unaffected by clone's write");

            let mut tail = [0u8; 1];
            read(4096, 1, &mut tail).unwrap();
            assert_eq!(tail[0], b'X');

            destroy().unwrap();
        });

        let src_tid = src_tid_rx.recv().unwrap();

        let clone = thread::spawn(move || {
            clone_from(src_tid).unwrap();

            let mut out = [0u8; 1];
            read(0, 1, &mut out).unwrap();
            assert_eq!(out[0], b'X', "clone must see source's data before writing");

            write(0, 1, b"y").unwrap();

            let mut out = [0u8; 1];
            read(0, 1, &mut out).unwrap();
            assert_eq!(out[0], b'y');

            let mut tail = [0u8; 1];
            read(4096, 1, &mut tail).unwrap();
            assert_eq!(tail[0], b'X', "unwritten page must remain shared/unchanged");

            destroy().unwrap();
        });

        go_clone_tx.send(()).unwrap();
        clone.join().unwrap();
        clone_done_tx.send(()).unwrap();
        src.join().unwrap();
    }

    #[test]
    fn clone_twice_triples_refcount_observably() {
        // We can't read `Page::refcount` from outside the crate; instead we
        // observe the CoW contract indirectly: two independent clones must
        // each see the source's data and must not affect each other or the
        // source when one of them writes.
        let (src_tid_tx, src_tid_rx) = mpsc::channel();
        let src = thread::spawn(move || {
            create(4096).unwrap();
            write(0, 4, b"base").unwrap();
            src_tid_tx.send(thread::current().id()).unwrap();
            thread::park();
            let mut out = [0u8; 4];
            read(0, 4, &mut out).unwrap();
            assert_eq!(&out, b"base");
            destroy().unwrap();
        });
        let src_thread = src.thread().clone();
        let src_tid = src_tid_rx.recv().unwrap();

        let clone_a = thread::spawn(move || {
            clone_from(src_tid).unwrap();
            write(0, 4, b"aaaa").unwrap();
            let mut out = [0u8; 4];
            read(0, 4, &mut out).unwrap();
            assert_eq!(&out, b"aaaa");
            destroy().unwrap();
        });
        clone_a.join().unwrap();

        let clone_b = thread::spawn(move || {
            clone_from(src_tid).unwrap();
            let mut out = [0u8; 4];
            read(0, 4, &mut out).unwrap();
            assert_eq!(&out, b"base", "clone_b must not see clone_a's private write");
            write(0, 4, b"bbbb").unwrap();
            destroy().unwrap();
        });
        clone_b.join().unwrap();

        src_thread.unpark();
        src.join().unwrap();
    }
}
