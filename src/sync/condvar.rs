use core::fmt;
use core::mem;
use core::ptr;
use core::time::Duration;
use syscalls::Errno;

use crate::error::{Error, Result};
use crate::sync::lock::{self, Lock, LockGuard};
use crate::sys;

/// Whether a timed wait on a condition variable returned because it was
/// woken or because its timeout ran out.
///
/// It is returned by the [`wait_timeout`] method.
///
/// [`wait_timeout`]: Condvar::wait_timeout
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum WaitOutcome {
    /// The wait ended before the deadline, through a notification or a
    /// spurious wakeup.
    Signaled,
    /// The deadline passed without a wakeup.
    TimedOut,
}

impl WaitOutcome {
    /// Returns `true` if the wait was known to have timed out.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        *self == WaitOutcome::TimedOut
    }
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WaitOutcome::Signaled => "signaled",
            WaitOutcome::TimedOut => "timed out",
        })
    }
}

/// A Condition Variable bound to one [`Lock`].
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. Condition
/// variables are typically associated with a boolean predicate (a condition)
/// and a lock. The predicate is always verified inside of the lock before
/// determining that a thread must block.
///
/// The lock is borrowed, not owned: a `Condvar` cannot outlive it and never
/// tears it down. Waiting takes the [`LockGuard`] as proof that the lock is
/// held, and a guard of any other lock is refused.
///
/// # Examples
///
/// ```
/// use futex_sync::sync::{Condvar, Lock};
/// use std::cell::Cell;
/// use std::thread;
///
/// let lock = Lock::new(Cell::new(false));
/// let cvar = Condvar::new(&lock);
///
/// thread::scope(|s| {
///     // Inside of our lock, spawn a new thread, and then wait for it to start.
///     s.spawn(|| {
///         let started = lock.acquire().unwrap();
///         started.set(true);
///         // We notify the condvar that the value has changed.
///         cvar.signal().unwrap();
///     });
///
///     // Wait for the thread to start up.
///     let mut started = lock.acquire().unwrap();
///     while !started.get() {
///         started = cvar.wait(started).unwrap();
///     }
/// });
/// ```
pub struct Condvar<'a, T: ?Sized = ()> {
    inner: sys::Condvar,
    lock: &'a Lock<T>,
}

fn wait_error(errno: Errno) -> Error {
    Error::ConditionWait { code: errno.into() }
}

/// Waits on `cond` with the lock behind `guard` released, handing the guard
/// back once the lock is held again.
pub(crate) fn wait_guarded<'a, T: ?Sized>(
    cond: &sys::Condvar,
    guard: LockGuard<'a, T>,
    timeout: Option<Duration>,
) -> Result<(LockGuard<'a, T>, WaitOutcome)> {
    let mutex = lock::raw_lock(lock::guard_lock(&guard));
    match unsafe { cond.wait(mutex, timeout) } {
        Ok(true) => Ok((guard, WaitOutcome::Signaled)),
        Ok(false) => Ok((guard, WaitOutcome::TimedOut)),
        // Dropping the guard releases the reacquired lock.
        Err(sys::WaitError::Held(errno)) => Err(wait_error(errno)),
        Err(sys::WaitError::Lost(errno)) => {
            // The lock is no longer ours, so the guard must not release it.
            mem::forget(guard);
            Err(wait_error(errno))
        }
    }
}

impl<'a, T: ?Sized> Condvar<'a, T> {
    /// Creates a new condition variable for `lock`, timing its waits with
    /// `CLOCK_MONOTONIC`.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::{Condvar, Lock};
    ///
    /// let lock = Lock::new(());
    /// let condvar = Condvar::new(&lock);
    /// ```
    #[must_use]
    #[inline]
    pub const fn new(lock: &'a Lock<T>) -> Condvar<'a, T> {
        Condvar { inner: sys::Condvar::new(nc::CLOCK_MONOTONIC), lock }
    }

    /// Creates a new condition variable for `lock` whose timed waits measure
    /// their deadline against `clock`.
    ///
    /// # Errors
    ///
    /// [`Error::ConditionInit`] carrying `EINVAL` unless `clock` is
    /// `CLOCK_MONOTONIC` or `CLOCK_REALTIME`.
    pub fn with_clock(lock: &'a Lock<T>, clock: nc::clockid_t) -> Result<Condvar<'a, T>> {
        if clock != nc::CLOCK_MONOTONIC && clock != nc::CLOCK_REALTIME {
            return Err(Error::ConditionInit { code: Errno::EINVAL.into() });
        }
        Ok(Condvar { inner: sys::Condvar::new(clock), lock })
    }

    /// The lock this condition variable is bound to.
    #[inline]
    pub fn lock(&self) -> &'a Lock<T> {
        self.lock
    }

    fn check_guard(&self, guard: &LockGuard<'a, T>) -> Result<()> {
        if ptr::eq(lock::guard_lock(guard), self.lock) {
            Ok(())
        } else {
            Err(wait_error(Errno::EINVAL))
        }
    }

    /// Blocks the current thread until this condition variable receives a
    /// notification.
    ///
    /// This function will atomically unlock the lock specified (represented by
    /// `guard`) and block the current thread. This means that any calls
    /// to [`signal`] or [`broadcast`] which happen logically after the
    /// lock is unlocked are candidates to wake this thread up. When this
    /// function call returns, the lock specified will have been re-acquired.
    ///
    /// Note that this function is susceptible to spurious wakeups. Condition
    /// variables normally have a boolean predicate associated with them, and
    /// the predicate must always be checked each time this function returns to
    /// protect against spurious wakeups.
    ///
    /// Every recursion level of a [`Recursive`](crate::sync::LockKind::Recursive)
    /// lock is released for the wait and restored afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::ConditionWait`] carrying `EINVAL` if `guard` belongs to a
    /// different lock, or the errno of the failed wait. The guard is consumed
    /// either way and the lock is no longer held when this returns an error.
    ///
    /// [`signal`]: Self::signal
    /// [`broadcast`]: Self::broadcast
    pub fn wait(&self, guard: LockGuard<'a, T>) -> Result<LockGuard<'a, T>> {
        self.check_guard(&guard)?;
        wait_guarded(&self.inner, guard, None).map(|(guard, _)| guard)
    }

    /// Blocks the current thread until the provided condition becomes false.
    ///
    /// `condition` is checked immediately; if not met (returns `true`), this
    /// will [`wait`] for the next notification then check again. This repeats
    /// until `condition` returns `false`, in which case this function returns.
    ///
    /// [`wait`]: Self::wait
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::{Condvar, Lock};
    /// use std::cell::Cell;
    /// use std::thread;
    ///
    /// let lock = Lock::new(Cell::new(true));
    /// let cvar = Condvar::new(&lock);
    ///
    /// thread::scope(|s| {
    ///     s.spawn(|| {
    ///         let pending = lock.acquire().unwrap();
    ///         pending.set(false);
    ///         cvar.signal().unwrap();
    ///     });
    ///
    ///     // As long as the value inside the lock is `true`, we wait.
    ///     let guard = cvar.wait_while(lock.acquire().unwrap(), |pending| pending.get()).unwrap();
    ///     assert!(!guard.get());
    /// });
    /// ```
    pub fn wait_while<F>(&self, mut guard: LockGuard<'a, T>, mut condition: F) -> Result<LockGuard<'a, T>>
    where
        F: FnMut(&T) -> bool,
    {
        while condition(&*guard) {
            guard = self.wait(guard)?;
        }
        Ok(guard)
    }

    /// Waits on this condition variable for a notification, timing out after a
    /// specified duration.
    ///
    /// The semantics of this function are equivalent to [`wait`] except that
    /// the thread will be blocked for roughly no longer than `dur`. The
    /// deadline is computed once, as the condition variable's clock plus
    /// `dur`, so a spurious wakeup followed by another call restarts the
    /// full duration.
    ///
    /// The returned [`WaitOutcome`] value indicates if the timeout is
    /// known to have elapsed.
    ///
    /// Like [`wait`], the lock specified will be re-acquired when this function
    /// returns, regardless of whether the timeout elapsed or not.
    ///
    /// [`wait`]: Self::wait
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::{Condvar, Lock, WaitOutcome};
    /// use std::time::Duration;
    ///
    /// let lock = Lock::new(());
    /// let cvar = Condvar::new(&lock);
    ///
    /// let mut guard = lock.acquire().unwrap();
    /// loop {
    ///     let (g, outcome) = cvar.wait_timeout(guard, Duration::from_millis(10)).unwrap();
    ///     guard = g;
    ///     // Nobody ever signals, so once the wakeups stop being spurious
    ///     // the wait times out.
    ///     if outcome == WaitOutcome::TimedOut {
    ///         break;
    ///     }
    /// }
    /// ```
    pub fn wait_timeout(
        &self,
        guard: LockGuard<'a, T>,
        dur: Duration,
    ) -> Result<(LockGuard<'a, T>, WaitOutcome)> {
        self.check_guard(&guard)?;
        wait_guarded(&self.inner, guard, Some(dur))
    }

    /// Wakes up one blocked thread on this condvar.
    ///
    /// If there is a blocked thread on this condition variable, then it will
    /// be woken up from its call to [`wait`] or [`wait_timeout`]. Calls to
    /// `signal` are not buffered in any way. Which waiter wakes is
    /// unspecified.
    ///
    /// To wake up all threads, see [`broadcast`].
    ///
    /// # Errors
    ///
    /// [`Error::ConditionSignal`] with the errno of the failed wake.
    ///
    /// [`wait`]: Self::wait
    /// [`wait_timeout`]: Self::wait_timeout
    /// [`broadcast`]: Self::broadcast
    pub fn signal(&self) -> Result<()> {
        self.inner.notify_one().map_err(|errno| Error::ConditionSignal { code: errno.into() })
    }

    /// Wakes up all blocked threads on this condvar.
    ///
    /// This method will ensure that any current waiters on the condition
    /// variable are awoken. Calls to `broadcast()` are not buffered in any
    /// way. The woken threads then race for the lock.
    ///
    /// To wake up only one thread, see [`signal`].
    ///
    /// # Errors
    ///
    /// [`Error::ConditionBroadcast`] with the errno of the failed wake.
    ///
    /// [`signal`]: Self::signal
    pub fn broadcast(&self) -> Result<()> {
        self.inner.notify_all().map_err(|errno| Error::ConditionBroadcast { code: errno.into() })
    }
}

impl<T: ?Sized> fmt::Debug for Condvar<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar").finish_non_exhaustive()
    }
}
