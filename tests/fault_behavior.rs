//! Integration tests for the Fault Router's two outcomes: kill only the
//! offending thread on an LSA page, or fall through to the default fault
//! behavior for everything else (SPEC_FULL.md §8, scenarios 4 and 5).
//!
//! Run with `cargo test --features test-support --test fault_behavior`.
//!
//! Scenario 5 deliberately crashes the whole process, so it re-execs this
//! same test binary as a child (the standard self-reexec trick for testing
//! fatal-signal behavior) and inspects the child's exit status rather than
//! running the crash inline.

use std::process::Command;

#[test]
fn unsanctioned_access_kills_only_the_offending_thread() {
    lsa::create(4096).unwrap();

    // A second, unrelated thread with its own LSA must keep running
    // completely unaffected by the first thread's crash.
    let bystander = std::thread::spawn(|| {
        lsa::create(4096).unwrap();
        lsa::write(0, 5, b"alive").unwrap();
        let mut out = [0u8; 5];
        lsa::read(0, 5, &mut out).unwrap();
        assert_eq!(&out, b"alive");
        lsa::destroy().unwrap();
    });

    let addr = lsa::debug_page_address(0).unwrap() as *mut u8;
    let offender = std::thread::spawn(move || {
        // SAFETY: none — this is exactly the unsanctioned access the Fault
        // Router exists to catch. The write below must never return: the
        // thread is terminated by the signal handler first.
        unsafe { std::ptr::write_volatile(addr, 0xff) };
        panic!("fault router did not terminate this thread");
    });

    // `pthread_exit` from the signal handler ends the thread like a normal
    // return, so `join` succeeds (it does not propagate a panic payload).
    let result = offender.join();
    assert!(
        result.is_ok(),
        "offending thread should be silently terminated, not panic"
    );

    bystander.join().expect("bystander thread must keep running");

    lsa::destroy().unwrap();
}

#[test]
fn unrelated_fault_terminates_the_process() {
    let exe = std::env::current_exe().expect("current test binary path");
    let output = Command::new(exe)
        .args(["--test-threads=1", "--exact", "--nocapture", "crash_on_null_deref"])
        .env("LSA_TEST_TRIGGER_NULL_DEREF", "1")
        .output()
        .expect("failed to spawn child test process");

    assert!(
        !output.status.success(),
        "child process should have crashed on the null dereference"
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        let signal = output.status.signal();
        assert!(
            signal == Some(libc::SIGSEGV) || signal == Some(libc::SIGBUS),
            "expected SIGSEGV/SIGBUS, got status {:?}",
            output.status
        );
    }
}

/// Not meant to be run directly by the normal test sweep: only runs its
/// body when `LSA_TEST_TRIGGER_NULL_DEREF` is set, which only the child
/// spawned by `unrelated_fault_terminates_the_process` sets.
#[test]
fn crash_on_null_deref() {
    if std::env::var_os("LSA_TEST_TRIGGER_NULL_DEREF").is_none() {
        return;
    }

    // An access entirely unrelated to any LSA. The Fault Router must find
    // no matching page and restore default disposition, so this crashes
    // the process exactly as it would with no LSA library loaded at all.
    let null = std::ptr::null_mut::<u8>();
    unsafe { std::ptr::write_volatile(null, 0) };
    unreachable!("null dereference did not fault");
}
