use core::cell::Cell;
use core::fmt;

use crate::error::Result;
use crate::sync::Lock;

/// Runs a unit of work at most once, however many threads ask for it.
///
/// The first call to [`execute`](Self::execute) marks the guard as used up
/// and then runs its body with the guard's lock held; every later call, and
/// every call that was blocked behind the first one, returns without running
/// anything. The mark is set before the body starts, so a body that fails or
/// panics is not retried.
///
/// # Examples
///
/// ```
/// use futex_sync::sync::OnceGuard;
///
/// let once = OnceGuard::new();
/// assert_eq!(once.execute(|| "ran").unwrap(), Some("ran"));
/// assert_eq!(once.execute(|| "ran again").unwrap(), None);
/// assert!(once.has_executed().unwrap());
/// ```
pub struct OnceGuard {
    executed: Lock<Cell<bool>>,
}

impl OnceGuard {
    /// Creates a guard that has not run anything yet.
    #[must_use]
    pub const fn new() -> OnceGuard {
        OnceGuard { executed: Lock::new(Cell::new(false)) }
    }

    /// Runs `body` if no call has run one before, returning its result.
    ///
    /// `body` must not call `execute` on the same guard, which would deadlock.
    ///
    /// # Errors
    ///
    /// The error of taking the internal lock, in which case `body` is not run.
    pub fn execute<R, F: FnOnce() -> R>(&self, body: F) -> Result<Option<R>> {
        self.executed.with_lock(|executed| {
            if executed.replace(true) {
                None
            } else {
                Some(body())
            }
        })
    }

    /// Returns `true` once some call to [`execute`](Self::execute) has
    /// started its body.
    pub fn has_executed(&self) -> Result<bool> {
        self.executed.with_lock(Cell::get)
    }
}

impl Default for OnceGuard {
    fn default() -> OnceGuard {
        OnceGuard::new()
    }
}

impl fmt::Debug for OnceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceGuard").finish_non_exhaustive()
    }
}
