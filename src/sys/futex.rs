use core::sync::atomic::AtomicU32;
use core::time::Duration;
use syscalls::{syscall, Errno, Sysno};

use crate::sys::timespec::Timespec;

/// An atomic for use as a futex. The kernel only ever looks at 32 bits.
pub type Futex = AtomicU32;
/// Must be the underlying type of Futex
pub type Primitive = u32;

#[cfg(feature = "not_process_private")]
const PRIVATE: i32 = 0;
#[cfg(not(feature = "not_process_private"))]
const PRIVATE: i32 = nc::FUTEX_PRIVATE_FLAG;

/// Waits for a `futex_wake` operation to wake us, giving up after `timeout`
/// has elapsed on `clock`.
///
/// Returns directly if the futex doesn't hold the expected value.
///
/// Returns `Ok(false)` on timeout, and `Ok(true)` in all other non-error cases.
pub fn futex_wait(
    futex: &Futex,
    expected: Primitive,
    timeout: Option<Duration>,
    clock: nc::clockid_t,
) -> Result<bool, Errno> {
    // Overflows are rounded up to an infinite timeout (None).
    let deadline = match timeout {
        Some(d) => Timespec::deadline(clock, &d)?,
        None => None,
    };
    futex_wait_until(futex, expected, deadline.as_ref(), clock)
}

/// Like [`futex_wait`], but with an absolute deadline on `clock`.
pub fn futex_wait_until(
    futex: &Futex,
    expected: Primitive,
    deadline: Option<&Timespec>,
    clock: nc::clockid_t,
) -> Result<bool, Errno> {
    use core::ptr::null;
    use core::sync::atomic::Ordering::Relaxed;

    let timespec = deadline.and_then(Timespec::to_timespec);

    let mut op = nc::FUTEX_WAIT_BITSET | PRIVATE;
    if clock == nc::CLOCK_REALTIME {
        op |= nc::FUTEX_CLOCK_REALTIME;
    }

    loop {
        // No need to wait if the value already changed.
        if futex.load(Relaxed) != expected {
            return Ok(true);
        }

        let r = unsafe {
            // Use FUTEX_WAIT_BITSET rather than FUTEX_WAIT to be able to give an
            // absolute time rather than a relative time.
            syscall!(
                Sysno::futex,
                futex as *const Futex,
                op,
                expected,
                timespec.as_ref().map_or(null(), |t| t as *const nc::timespec_t),
                null::<u32>(), // This argument is unused for FUTEX_WAIT_BITSET.
                !0u32          // A full bitmask, to make it behave like a regular FUTEX_WAIT.
            )
        };

        match r {
            Ok(_) | Err(Errno::EAGAIN) => return Ok(true),
            Err(Errno::ETIMEDOUT) => return Ok(false),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Wakes up one thread that's blocked on `futex_wait` on this futex.
///
/// Returns true if this actually woke up such a thread,
/// or false if no thread was waiting on this futex.
pub fn futex_wake(futex: &Futex) -> Result<bool, Errno> {
    let ptr = futex as *const Futex;
    let op = nc::FUTEX_WAKE | PRIVATE;
    unsafe { syscall!(Sysno::futex, ptr, op, 1) }.map(|woken| woken > 0)
}

/// Wakes up all threads that are waiting on `futex_wait` on this futex.
pub fn futex_wake_all(futex: &Futex) -> Result<(), Errno> {
    let ptr = futex as *const Futex;
    let op = nc::FUTEX_WAKE | PRIVATE;
    unsafe { syscall!(Sysno::futex, ptr, op, i32::MAX) }.map(drop)
}
