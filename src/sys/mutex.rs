use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::time::Duration;
use syscalls::Errno;

use crate::error::{report, Error};
use crate::sync::LockKind;
use crate::sys::futex::{futex_wait_until, futex_wake, Futex, Primitive};
use crate::sys::thread::current_thread_id;
use crate::sys::timespec::Timespec;

const UNLOCKED: Primitive = 0;
const LOCKED: Primitive = 1; // locked, no other threads waiting
const CONTENDED: Primitive = 2; // locked, and other threads waiting (contended)

/// Who the calling thread is relative to the current holder of the lock.
enum Caller {
    /// The kind does not track its owner.
    Untracked,
    /// The caller does not hold the lock. Carries the caller's thread id.
    Other(u32),
    /// The caller already holds the lock.
    Owner,
}

/// The state handed from [`Mutex::unlock_for_wait`] to
/// [`Mutex::relock_after_wait`].
pub(crate) struct Released {
    pub depth: u32,
    /// Outcome of waking a contender. The futex word is released either way.
    pub wake: Result<(), Errno>,
}

pub(crate) struct Mutex {
    futex: Futex,
    kind: LockKind,
    /// Thread id of the holder; only maintained when the kind tracks ownership.
    owner: AtomicU32,
    /// Recursion depth of the holder; only ever touched by the holder.
    depth: AtomicU32,
}

impl Drop for Mutex {
    fn drop(&mut self) {
        // Only reachable with the lock set if a guard was leaked.
        if self.is_locked() {
            let error = Error::Destroy { code: Errno::EBUSY.into() };
            report("Lock", "drop", &error);
        }
    }
}

impl Mutex {
    #[inline]
    pub const fn new(kind: LockKind) -> Self {
        Self {
            futex: Futex::new(UNLOCKED),
            kind,
            owner: AtomicU32::new(0),
            depth: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// Whether the futex word is set, by anyone.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.futex.load(Relaxed) != UNLOCKED
    }

    fn caller(&self) -> Result<Caller, Errno> {
        if !matches!(self.kind, LockKind::ErrorCheck | LockKind::Recursive) {
            return Ok(Caller::Untracked);
        }
        let tid = current_thread_id()?;
        // Only this thread could have stored its own id, so a relaxed load is
        // enough to tell whether we are the owner.
        if self.owner.load(Relaxed) == tid {
            Ok(Caller::Owner)
        } else {
            Ok(Caller::Other(tid))
        }
    }

    fn reenter(&self) -> Result<(), Errno> {
        let depth = self.depth.load(Relaxed).checked_add(1).ok_or(Errno::EAGAIN)?;
        self.depth.store(depth, Relaxed);
        Ok(())
    }

    fn take_ownership(&self, caller: &Caller, depth: u32) {
        if let Caller::Other(tid) = *caller {
            self.owner.store(tid, Relaxed);
            self.depth.store(depth, Relaxed);
        }
    }

    fn give_up_ownership(&self) {
        self.owner.store(0, Relaxed);
        self.depth.store(0, Relaxed);
    }

    #[inline]
    fn try_lock_futex(&self) -> bool {
        self.futex.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed).is_ok()
    }

    pub fn try_lock(&self) -> Result<bool, Errno> {
        let caller = self.caller()?;
        if let Caller::Owner = caller {
            return match self.kind {
                LockKind::Recursive => self.reenter().map(|()| true),
                _ => Ok(false),
            };
        }
        if !self.try_lock_futex() {
            return Ok(false);
        }
        self.take_ownership(&caller, 1);
        Ok(true)
    }

    pub fn lock(&self) -> Result<(), Errno> {
        self.lock_until(None).map(drop)
    }

    /// Locks, giving up once `timeout` has elapsed. Returns `Ok(false)` on timeout.
    pub fn lock_for(&self, timeout: Duration) -> Result<bool, Errno> {
        let deadline = Timespec::deadline(nc::CLOCK_MONOTONIC, &timeout)?;
        self.lock_until(deadline.as_ref())
    }

    /// Locks, giving up once `deadline` on `CLOCK_MONOTONIC` has passed.
    ///
    /// Returns `Ok(false)` on timeout. With no deadline this only returns
    /// once the lock is held, or on error.
    ///
    /// An `ErrorCheck` owner relocking with a deadline runs it out like any
    /// other contender; only the unbounded relock fails with `EDEADLK`.
    pub fn lock_until(&self, deadline: Option<&Timespec>) -> Result<bool, Errno> {
        let caller = self.caller()?;
        if let Caller::Owner = caller {
            return match (self.kind, deadline) {
                (LockKind::Recursive, _) => self.reenter().map(|()| true),
                // The word stays set while we hold it, so this only ends at
                // the deadline.
                (_, Some(_)) => self.lock_contended(deadline).map(|_| false),
                (_, None) => Err(Errno::EDEADLK),
            };
        }
        if !self.try_lock_futex() && !self.lock_contended(deadline)? {
            return Ok(false);
        }
        self.take_ownership(&caller, 1);
        Ok(true)
    }

    #[cold]
    fn lock_contended(&self, deadline: Option<&Timespec>) -> Result<bool, Errno> {
        // Spin first to speed things up if the lock is released quickly.
        let mut state = self.spin();

        // If it's unlocked now, attempt to take the lock
        // without marking it as contended.
        if state == UNLOCKED {
            match self.futex.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed) {
                Ok(_) => return Ok(true), // Locked!
                Err(s) => state = s,
            }
        }

        loop {
            // Put the lock in contended state.
            // We avoid an unnecessary write if it as already set to CONTENDED,
            // to be friendlier for the caches.
            if state != CONTENDED && self.futex.swap(CONTENDED, Acquire) == UNLOCKED {
                // We changed it from UNLOCKED to CONTENDED, so we just successfully locked it.
                return Ok(true);
            }

            // Wait for the futex to change state, assuming it is still CONTENDED.
            if !futex_wait_until(&self.futex, CONTENDED, deadline, nc::CLOCK_MONOTONIC)? {
                return Ok(false);
            }

            // Spin again after waking up.
            state = self.spin();
        }
    }

    fn spin(&self) -> Primitive {
        let mut spin = 100;
        loop {
            // We only use `load` (and not `swap` or `compare_exchange`)
            // while spinning, to be easier on the caches.
            let state = self.futex.load(Relaxed);

            // We stop spinning when the mutex is UNLOCKED,
            // but also when it's CONTENDED.
            if state != LOCKED || spin == 0 {
                return state;
            }

            core::hint::spin_loop();
            spin -= 1;
        }
    }

    pub fn unlock(&self) -> Result<(), Errno> {
        match self.caller()? {
            Caller::Other(_) => return Err(Errno::EPERM),
            Caller::Owner => {
                let depth = self.depth.load(Relaxed);
                if depth > 1 {
                    self.depth.store(depth - 1, Relaxed);
                    return Ok(());
                }
                self.give_up_ownership();
            }
            Caller::Untracked => {}
        }
        self.unlock_futex()
    }

    fn unlock_futex(&self) -> Result<(), Errno> {
        if self.futex.swap(UNLOCKED, Release) == CONTENDED {
            // We only wake up one thread. When that thread locks the mutex, it
            // will mark the mutex as contended (2) (see lock_contended above),
            // which makes sure that any other waiting threads will also be
            // woken up eventually.
            futex_wake(&self.futex)?;
        }
        Ok(())
    }

    /// Releases every recursion level held by the caller ahead of a
    /// condition wait.
    ///
    /// An error means nothing was released.
    pub fn unlock_for_wait(&self) -> Result<Released, Errno> {
        let depth = match self.caller()? {
            Caller::Other(_) => return Err(Errno::EPERM),
            Caller::Owner => {
                let depth = self.depth.load(Relaxed);
                self.give_up_ownership();
                depth
            }
            Caller::Untracked => 1,
        };
        Ok(Released { depth, wake: self.unlock_futex() })
    }

    /// Reacquires the lock after a condition wait, restoring `depth`.
    pub fn relock_after_wait(&self, depth: u32) -> Result<(), Errno> {
        let caller = self.caller()?;
        if !self.try_lock_futex() {
            self.lock_contended(None)?;
        }
        self.take_ownership(&caller, depth);
        Ok(())
    }
}
