use core::cell::Cell;
use core::fmt;

use crate::error::{Error, Result};
use crate::sync::condvar::wait_guarded;
use crate::sync::Lock;
use crate::sys;

/// A counting rendezvous: producers register outstanding work with
/// [`add`], mark it finished with [`done`], and any number of threads block
/// in [`wait`] until the count drops to zero.
///
/// The counter lives behind a private [`Lock`] and condition variable, so
/// every mutation and every check of it is serialized and no wakeup is lost.
///
/// [`add`]: Self::add
/// [`done`]: Self::done
/// [`wait`]: Self::wait
///
/// # Examples
///
/// ```
/// use futex_sync::sync::WaitGroup;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::thread;
///
/// let wg = Arc::new(WaitGroup::new());
/// let finished = Arc::new(AtomicUsize::new(0));
///
/// wg.add(4).unwrap();
/// for _ in 0..4 {
///     let (wg, finished) = (Arc::clone(&wg), Arc::clone(&finished));
///     thread::spawn(move || {
///         finished.fetch_add(1, Ordering::SeqCst);
///         wg.done().unwrap();
///     });
/// }
///
/// wg.wait().unwrap();
/// assert_eq!(finished.load(Ordering::SeqCst), 4);
/// ```
pub struct WaitGroup {
    count: Lock<Cell<i64>>,
    cond: sys::Condvar,
}

impl WaitGroup {
    /// Creates a wait group with a zero count.
    #[must_use]
    pub const fn new() -> WaitGroup {
        WaitGroup { count: Lock::new(Cell::new(0)), cond: sys::Condvar::new(nc::CLOCK_MONOTONIC) }
    }

    /// Adds `delta`, which may be negative, to the counter and wakes every
    /// waiter so it can check the new value.
    ///
    /// # Errors
    ///
    /// [`Error::NegativeCounter`] if the counter would drop below zero and
    /// [`Error::CounterOverflow`] if it would not fit in an `i64`. The
    /// counter is left unchanged in both cases. Otherwise the error of taking
    /// the internal lock or of the broadcast.
    pub fn add(&self, delta: i64) -> Result<()> {
        let count = self.count.acquire()?;
        let Some(next) = count.get().checked_add(delta) else {
            return Err(Error::CounterOverflow { count: count.get(), delta });
        };
        if next < 0 {
            return Err(Error::NegativeCounter { count: next });
        }
        count.set(next);
        self.cond
            .notify_all()
            .map_err(|errno| Error::ConditionBroadcast { code: errno.into() })
    }

    /// Decrements the counter by one.
    pub fn done(&self) -> Result<()> {
        self.add(-1)
    }

    /// Blocks until the counter is zero.
    ///
    /// There is no timeout. A producer that never calls [`done`](Self::done)
    /// blocks every waiter forever.
    pub fn wait(&self) -> Result<()> {
        let mut count = self.count.acquire()?;
        while count.get() > 0 {
            count = wait_guarded(&self.cond, count, None)?.0;
        }
        Ok(())
    }

    /// The current value of the counter.
    ///
    /// The value may already be stale when it is returned.
    pub fn count(&self) -> Result<i64> {
        self.count.with_lock(Cell::get)
    }
}

impl Default for WaitGroup {
    fn default() -> WaitGroup {
        WaitGroup::new()
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("WaitGroup");
        match self.count() {
            Ok(count) => d.field("count", &count),
            Err(_) => d.field("count", &format_args!("<unavailable>")),
        };
        d.finish()
    }
}
