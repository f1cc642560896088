use std::thread::ThreadId;

/// Contract-violation errors returned by the public API.
///
/// Host-facility failures (a failing `mprotect`, or an `mmap` failure during
/// a copy-on-write split) are not represented here: per the crate's error
/// handling design they are fatal to the process and reported by panicking
/// after a `tracing::error!` log line, since the library cannot guarantee
/// its core protection invariant once one of those calls fails.
#[derive(Debug, thiserror::Error)]
pub enum LsaError {
    /// `create`/`clone_from` called on a thread that already owns an LSA.
    #[error("current thread already has a local storage area")]
    AlreadyHasLsa,

    /// `create(0)`.
    #[error("local storage area size must be greater than zero")]
    InvalidSize,

    /// `destroy`/`read`/`write` called on a thread with no LSA.
    #[error("current thread has no local storage area")]
    NoLsa,

    /// `clone_from(tid)` where `tid` owns no LSA.
    #[error("source thread {0:?} has no local storage area")]
    SourceHasNoLsa(ThreadId),

    /// `offset + length` exceeds the LSA's size, or overflows.
    #[error("access range is out of bounds for this local storage area")]
    OutOfRange,

    /// `caller`'s buffer is smaller than `length`.
    #[error("buffer is too small for the requested length")]
    BufferTooSmall,

    /// `mmap` failed while allocating pages for `create`; any pages already
    /// mapped for this call were released before returning. Not reachable
    /// from `write`'s copy-on-write split: an `mmap` failure there is fatal
    /// to the process instead (see `access::write`).
    #[error("failed to map memory for local storage area")]
    OutOfMemory,
}
