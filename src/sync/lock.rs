use crate::error::{report, Error, ErrorCode, Result};
use crate::sys;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Deref;
use core::sync::atomic::AtomicI32;
use core::sync::atomic::Ordering::Relaxed;
use core::time::Duration;
use syscalls::Errno;

/// How a [`Lock`] behaves when the thread holding it tries to lock it again.
///
/// The kind is fixed when the lock is created.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Relocking from the holding thread is not supported. This kind behaves
    /// exactly like [`Normal`](LockKind::Normal).
    #[default]
    Default,
    /// No deadlock detection. A thread that relocks the lock with
    /// [`Lock::acquire`] deadlocks, a non-blocking attempt reports
    /// [`Busy`](LockOutcome::Busy) and a timed attempt runs out its timeout.
    Normal,
    /// The holding thread relocking with [`Lock::acquire`] fails with
    /// [`Error::Acquire`] carrying `EDEADLK`. A non-blocking attempt reports
    /// [`Busy`](LockOutcome::Busy) and a timed attempt reports it once the
    /// timeout has run out.
    ErrorCheck,
    /// The holding thread may lock again. Each acquisition needs its own
    /// release before another thread can take the lock.
    Recursive,
}

/// Creation-time configuration of a [`Lock`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LockAttributes {
    /// What a relock by the holding thread does.
    pub kind: LockKind,
    /// Enables the priority ceiling calls on the lock. Must lie within the
    /// `SCHED_FIFO` priority range.
    pub priority_ceiling: Option<i32>,
}

/// The outcome of a lock attempt that may give up.
///
/// `G` is whatever the successful attempt produced, a [`LockGuard`] for the
/// `try_acquire` methods or the body's return value for the `with_try_lock`
/// methods.
#[must_use]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LockOutcome<G = ()> {
    /// The lock was taken.
    Acquired(G),
    /// The lock was held elsewhere for the whole attempt.
    Busy,
}

impl<G> LockOutcome<G> {
    /// Returns `true` if the lock was taken.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }

    /// Returns `true` if the lock could not be taken.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, LockOutcome::Busy)
    }

    /// Converts into an [`Option`], discarding the `Busy` case.
    pub fn acquired(self) -> Option<G> {
        match self {
            LockOutcome::Acquired(g) => Some(g),
            LockOutcome::Busy => None,
        }
    }

    /// Applies `f` to the acquired value, keeping `Busy` as is.
    pub fn map<U, F: FnOnce(G) -> U>(self, f: F) -> LockOutcome<U> {
        match self {
            LockOutcome::Acquired(g) => LockOutcome::Acquired(f(g)),
            LockOutcome::Busy => LockOutcome::Busy,
        }
    }
}

impl<G> fmt::Display for LockOutcome<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockOutcome::Acquired(_) => "acquired",
            LockOutcome::Busy => "busy",
        })
    }
}

/// A mutual exclusion primitive protecting a value of type `T`.
///
/// The value is reachable only through a [`LockGuard`], handed out by
/// [`acquire`], [`try_acquire`] and [`try_acquire_for`]. When the guard goes
/// out of scope the lock is released.
///
/// Guards only give shared access to `T`, since a [`Recursive`] lock can hand
/// out several guards to the same thread at once. Use a [`Cell`] or
/// [`RefCell`] inside the lock to mutate the value.
///
/// # Poisoning
///
/// There is no poisoning. A thread that panics while holding the lock
/// releases it during unwinding, and whatever state it left behind is what
/// the next holder sees.
///
/// [`acquire`]: Self::acquire
/// [`try_acquire`]: Self::try_acquire
/// [`try_acquire_for`]: Self::try_acquire_for
/// [`Recursive`]: LockKind::Recursive
/// [`Cell`]: core::cell::Cell
/// [`RefCell`]: core::cell::RefCell
///
/// # Examples
///
/// ```
/// use futex_sync::sync::Lock;
/// use std::cell::Cell;
/// use std::sync::Arc;
/// use std::thread;
///
/// const N: usize = 10;
///
/// // Spawn a few threads to increment a shared variable, each one taking
/// // the lock for the duration of its increment.
/// let data = Arc::new(Lock::new(Cell::new(0)));
///
/// let handles: Vec<_> = (0..N)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         thread::spawn(move || {
///             data.with_lock(|count| count.set(count.get() + 1)).unwrap();
///         })
///     })
///     .collect();
///
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(data.with_lock(Cell::get).unwrap(), N);
/// ```
///
/// To release a lock before the end of the enclosing scope, and find out
/// whether the release worked, use [`LockGuard::release`].
///
/// ```
/// use futex_sync::sync::Lock;
///
/// let lock = Lock::new(vec![1, 2, 3]);
/// let guard = lock.acquire().unwrap();
/// assert_eq!(guard.len(), 3);
/// guard.release().unwrap();
/// assert!(!lock.is_held().unwrap());
/// ```
pub struct Lock<T: ?Sized = ()> {
    inner: sys::Mutex,
    ceiling: Option<AtomicI32>,
    data: UnsafeCell<T>,
}

/// `T` must be `Send` for a [`Lock`] to be `Send` because it is possible to acquire
/// the owned `T` from the `Lock` via [`into_inner`].
///
/// [`into_inner`]: Lock::into_inner
unsafe impl<T: ?Sized + Send> Send for Lock<T> {}

/// `T` must be `Send` for [`Lock`] to be `Sync`.
///
/// Only the thread holding the lock can reach the `&T`, so `T` itself does
/// not need to be `Sync`.
unsafe impl<T: ?Sized + Send> Sync for Lock<T> {}

/// An RAII implementation of a "scoped lock" of a [`Lock`]. When this
/// structure is dropped (falls out of scope), the lock will be released.
///
/// A release that fails while dropping is reported to the log sink; use
/// [`release`](Self::release) to receive the error instead.
///
/// The protected value can be accessed through this guard via its [`Deref`]
/// implementation.
#[must_use = "if unused the Lock will immediately unlock"]
#[clippy::has_significant_drop]
pub struct LockGuard<'a, T: ?Sized + 'a> {
    lock: &'a Lock<T>,
    // The kernel thread id of the acquiring thread is recorded as the owner,
    // so the guard must be released on the thread that created it.
    _not_send: PhantomData<*const ()>,
}

/// `T` must be `Sync` for a [`LockGuard<T>`] to be `Sync`
/// because it is possible to get a `&T` from `&LockGuard` (via `Deref`).
unsafe impl<T: ?Sized + Sync> Sync for LockGuard<'_, T> {}

fn acquire_error(errno: Errno) -> Error {
    Error::Acquire { code: errno.into() }
}

fn release_error(errno: Errno) -> Error {
    Error::Release { code: errno.into() }
}

fn ceiling_error(errno: Errno) -> Error {
    Error::PriorityCeiling { code: errno.into() }
}

fn check_ceiling(ceiling: i32) -> core::result::Result<i32, ErrorCode> {
    if sys::fifo_priority_range()?.contains(&ceiling) {
        Ok(ceiling)
    } else {
        Err(Errno::EINVAL.into())
    }
}

impl<T> Lock<T> {
    /// Creates a new lock of the [`Default`](LockKind::Default) kind in an
    /// unlocked state ready for use.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::Lock;
    ///
    /// let lock = Lock::new(0);
    /// ```
    #[inline]
    pub const fn new(t: T) -> Lock<T> {
        Lock::with_kind(t, LockKind::Default)
    }

    /// Creates a new unlocked lock of the given kind.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::{Lock, LockKind};
    ///
    /// let lock = Lock::with_kind(0, LockKind::Recursive);
    /// let outer = lock.acquire().unwrap();
    /// let inner = lock.acquire().unwrap();
    /// assert_eq!(*inner + *outer, 0);
    /// ```
    #[inline]
    pub const fn with_kind(t: T, kind: LockKind) -> Lock<T> {
        Lock { inner: sys::Mutex::new(kind), ceiling: None, data: UnsafeCell::new(t) }
    }

    /// Creates a new unlocked lock from a full set of attributes.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Init`] carrying `EINVAL` if the priority ceiling
    /// lies outside the `SCHED_FIFO` priority range, or with the errno of the
    /// query if the range cannot be read.
    pub fn with_attributes(t: T, attributes: LockAttributes) -> Result<Lock<T>> {
        let ceiling = match attributes.priority_ceiling {
            Some(ceiling) => {
                let ceiling = check_ceiling(ceiling).map_err(|code| Error::Init { code })?;
                Some(AtomicI32::new(ceiling))
            }
            None => None,
        };
        Ok(Lock { inner: sys::Mutex::new(attributes.kind), ceiling, data: UnsafeCell::new(t) })
    }
}

impl<T: ?Sized> Lock<T> {
    /// The kind this lock was created with.
    #[inline]
    pub fn kind(&self) -> LockKind {
        self.inner.kind()
    }

    /// Acquires the lock, blocking the current thread until it is able to do so.
    ///
    /// Contention never fails; the thread simply waits. What happens when the
    /// holding thread calls this again depends on the [`LockKind`].
    ///
    /// # Errors
    ///
    /// [`Error::Acquire`] with the errno of the failure, `EDEADLK` for a
    /// relock of an [`ErrorCheck`](LockKind::ErrorCheck) lock and `EAGAIN`
    /// if a [`Recursive`](LockKind::Recursive) lock's depth would overflow.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::Lock;
    /// use std::cell::Cell;
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// let lock = Arc::new(Lock::new(Cell::new(0)));
    /// let c_lock = Arc::clone(&lock);
    ///
    /// thread::spawn(move || {
    ///     c_lock.acquire().unwrap().set(10);
    /// }).join().expect("thread::spawn failed");
    /// assert_eq!(lock.acquire().unwrap().get(), 10);
    /// ```
    pub fn acquire(&self) -> Result<LockGuard<'_, T>> {
        self.inner.lock().map_err(acquire_error)?;
        Ok(LockGuard::new(self))
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// # Errors
    ///
    /// [`Error::Acquire`] if the attempt fails for a reason other than the
    /// lock being held.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::Lock;
    ///
    /// let lock = Lock::new(0);
    /// let guard = lock.acquire().unwrap();
    /// assert!(lock.try_acquire().unwrap().is_busy());
    /// drop(guard);
    /// assert!(lock.try_acquire().unwrap().is_acquired());
    /// ```
    pub fn try_acquire(&self) -> Result<LockOutcome<LockGuard<'_, T>>> {
        if self.inner.try_lock().map_err(acquire_error)? {
            Ok(LockOutcome::Acquired(LockGuard::new(self)))
        } else {
            Ok(LockOutcome::Busy)
        }
    }

    /// Attempts to acquire the lock, waiting at most `timeout` for it to
    /// become available.
    ///
    /// The waiting thread is parked in the kernel rather than spinning, and
    /// takes the lock as soon as it is released. `Busy` is only reported once
    /// the full timeout has passed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTimeout`] for a zero `timeout`, otherwise as for
    /// [`acquire`](Self::acquire), except that a relock of an
    /// [`ErrorCheck`](LockKind::ErrorCheck) lock reports `Busy` once the
    /// timeout has passed instead of failing.
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<LockOutcome<LockGuard<'_, T>>> {
        if timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }
        if self.inner.lock_for(timeout).map_err(acquire_error)? {
            Ok(LockOutcome::Acquired(LockGuard::new(self)))
        } else {
            Ok(LockOutcome::Busy)
        }
    }

    /// Runs `body` with the lock held and returns its result.
    ///
    /// The lock is released however `body` exits, including by panicking.
    /// A failed release is reported to the log sink and does not replace the
    /// result.
    ///
    /// # Errors
    ///
    /// As for [`acquire`](Self::acquire); `body` is not run.
    pub fn with_lock<R, F: FnOnce(&T) -> R>(&self, body: F) -> Result<R> {
        let guard = self.acquire()?;
        Ok(body(&*guard))
    }

    /// Runs `body` with the lock held if it can be taken without blocking.
    pub fn with_try_lock<R, F: FnOnce(&T) -> R>(&self, body: F) -> Result<LockOutcome<R>> {
        Ok(self.try_acquire()?.map(|guard| body(&*guard)))
    }

    /// Runs `body` with the lock held if it can be taken within `timeout`.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::{Lock, LockOutcome};
    /// use std::time::Duration;
    ///
    /// let lock = Lock::new("done");
    /// let outcome = lock.with_try_lock_for(Duration::from_millis(10), |s| s.len()).unwrap();
    /// assert_eq!(outcome, LockOutcome::Acquired(4));
    /// ```
    pub fn with_try_lock_for<R, F: FnOnce(&T) -> R>(
        &self,
        timeout: Duration,
        body: F,
    ) -> Result<LockOutcome<R>> {
        Ok(self.try_acquire_for(timeout)?.map(|guard| body(&*guard)))
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This takes and immediately releases the lock, so the answer may be
    /// stale by the time it is returned. A [`Recursive`](LockKind::Recursive)
    /// lock held by the calling thread reports `false`, because the calling
    /// thread can take it.
    pub fn is_held(&self) -> Result<bool> {
        match self.try_acquire()? {
            LockOutcome::Acquired(guard) => guard.release().map(|()| false),
            LockOutcome::Busy => Ok(true),
        }
    }

    /// Replaces the priority ceiling, returning the previous one.
    ///
    /// The lock is taken while the ceiling changes, so this blocks while
    /// another thread holds it. The ceiling is recorded for the protocol's
    /// callers; the scheduler priority of the holder is left untouched.
    ///
    /// # Errors
    ///
    /// [`Error::PriorityCeiling`] carrying `EINVAL` if the lock was created
    /// without a ceiling or `ceiling` is out of range, or the errno of a
    /// failed lock or unlock.
    pub fn set_priority_ceiling(&self, ceiling: i32) -> Result<i32> {
        let Some(slot) = &self.ceiling else {
            return Err(ceiling_error(Errno::EINVAL));
        };
        let ceiling = check_ceiling(ceiling).map_err(|code| Error::PriorityCeiling { code })?;

        self.inner.lock().map_err(ceiling_error)?;
        let old = slot.swap(ceiling, Relaxed);
        self.inner.unlock().map_err(ceiling_error)?;
        Ok(old)
    }

    /// The current priority ceiling.
    ///
    /// # Errors
    ///
    /// [`Error::PriorityCeiling`] carrying `EINVAL` if the lock was created
    /// without a ceiling.
    pub fn priority_ceiling(&self) -> Result<i32> {
        match &self.ceiling {
            Some(slot) => Ok(slot.load(Relaxed)),
            None => Err(ceiling_error(Errno::EINVAL)),
        }
    }

    /// Consumes this lock, returning the underlying data.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::Lock;
    ///
    /// let lock = Lock::new(0);
    /// assert_eq!(lock.into_inner(), 0);
    /// ```
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Lock` mutably, no actual locking needs to
    /// take place -- the mutable borrow statically guarantees no guards exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use futex_sync::sync::Lock;
    ///
    /// let mut lock = Lock::new(0);
    /// *lock.get_mut() = 10;
    /// assert_eq!(*lock.acquire().unwrap(), 10);
    /// ```
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> From<T> for Lock<T> {
    /// Creates a new lock in an unlocked state ready for use.
    /// This is equivalent to [`Lock::new`].
    fn from(t: T) -> Self {
        Lock::new(t)
    }
}

impl<T: Default> Default for Lock<T> {
    /// Creates a `Lock<T>`, with the `Default` value for T.
    fn default() -> Lock<T> {
        Lock::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Lock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Lock");
        d.field("kind", &self.kind());
        match self.try_acquire() {
            Ok(LockOutcome::Acquired(guard)) => {
                d.field("data", &&*guard);
            }
            Ok(LockOutcome::Busy) | Err(_) => {
                d.field("data", &format_args!("<locked>"));
            }
        }
        d.finish_non_exhaustive()
    }
}

impl<'lock, T: ?Sized> LockGuard<'lock, T> {
    fn new(lock: &'lock Lock<T>) -> LockGuard<'lock, T> {
        LockGuard { lock, _not_send: PhantomData }
    }

    /// Releases the lock, returning any failure to the caller instead of
    /// the log sink.
    ///
    /// # Errors
    ///
    /// [`Error::Release`] with the errno of the failure.
    pub fn release(self) -> Result<()> {
        let lock = self.lock;
        mem::forget(self);
        lock.inner.unlock().map_err(release_error)
    }
}

impl<T: ?Sized> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for LockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        if let Err(errno) = self.lock.inner.unlock() {
            report("Lock", "release", &release_error(errno));
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for LockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for LockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

pub(crate) fn guard_lock<'a, T: ?Sized>(guard: &LockGuard<'a, T>) -> &'a Lock<T> {
    guard.lock
}

pub(crate) fn raw_lock<T: ?Sized>(lock: &Lock<T>) -> &sys::Mutex {
    &lock.inner
}
