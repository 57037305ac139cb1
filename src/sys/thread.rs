use core::ops::RangeInclusive;
use syscalls::{syscall, Errno, Sysno};

/// Kernel thread id of the calling thread. Never zero.
pub fn current_thread_id() -> Result<u32, Errno> {
    unsafe { syscall!(Sysno::gettid) }.map(|tid| tid as u32)
}

/// The priorities the scheduler accepts for `SCHED_FIFO` threads, which is
/// also the range a priority ceiling must fall in.
pub fn fifo_priority_range() -> Result<RangeInclusive<i32>, Errno> {
    let min = unsafe { syscall!(Sysno::sched_get_priority_min, nc::SCHED_FIFO) }?;
    let max = unsafe { syscall!(Sysno::sched_get_priority_max, nc::SCHED_FIFO) }?;
    Ok(min as i32..=max as i32)
}
