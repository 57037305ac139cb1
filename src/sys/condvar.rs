use core::sync::atomic::Ordering::Relaxed;
use core::time::Duration;
use syscalls::Errno;

use crate::sys::futex::{futex_wait, futex_wake, futex_wake_all, Futex};
use crate::sys::Mutex;

/// Why a condition wait failed, and whether the mutex is still held.
pub(crate) enum WaitError {
    /// The mutex is held by the caller again.
    Held(Errno),
    /// The mutex could not be reacquired.
    Lost(Errno),
}

pub(crate) struct Condvar {
    // The value of this atomic is simply incremented on every notification.
    // This is used by `.wait()` to not miss any notifications after
    // unlocking the mutex and before waiting for notifications.
    futex: Futex,
    clock: nc::clockid_t,
}

impl Condvar {
    #[inline]
    pub const fn new(clock: nc::clockid_t) -> Self {
        Self { futex: Futex::new(0), clock }
    }

    // All the memory orderings here are `Relaxed`,
    // because synchronization is done by unlocking and locking the mutex.

    pub fn notify_one(&self) -> Result<(), Errno> {
        self.futex.fetch_add(1, Relaxed);
        futex_wake(&self.futex).map(drop)
    }

    pub fn notify_all(&self) -> Result<(), Errno> {
        self.futex.fetch_add(1, Relaxed);
        futex_wake_all(&self.futex)
    }

    /// Returns `Ok(false)` if the timeout elapsed.
    ///
    /// # Safety
    ///
    /// The calling thread must hold `mutex`.
    pub unsafe fn wait(&self, mutex: &Mutex, timeout: Option<Duration>) -> Result<bool, WaitError> {
        // Examine the notification counter _before_ we unlock the mutex.
        let futex_value = self.futex.load(Relaxed);

        // Unlock the mutex before going to sleep.
        let released = mutex.unlock_for_wait().map_err(WaitError::Held)?;

        // Wait, but only if there hasn't been any
        // notification since we unlocked the mutex.
        let waited = futex_wait(&self.futex, futex_value, timeout, self.clock);

        // Lock the mutex again.
        mutex.relock_after_wait(released.depth).map_err(WaitError::Lost)?;

        released.wake.map_err(WaitError::Held)?;
        waited.map_err(WaitError::Held)
    }
}
