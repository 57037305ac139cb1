use core::time::Duration;
use nc::timespec_t;
use syscalls::Errno;

const NSEC_PER_SEC: u32 = 1_000_000_000;

/// An absolute point in time on one of the kernel clocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Timespec {
    tv_sec: i64,
    tv_nsec: u32,
}

impl Timespec {
    pub fn now(clock: nc::clockid_t) -> Result<Timespec, Errno> {
        use core::mem::MaybeUninit;

        let mut t: MaybeUninit<timespec_t> = MaybeUninit::uninit();
        unsafe { nc::clock_gettime(clock, &mut *t.as_mut_ptr()) }.map_err(Errno::new)?;
        let t = unsafe { t.assume_init() };

        match u32::try_from(t.tv_nsec) {
            Ok(tv_nsec) if tv_nsec < NSEC_PER_SEC => Ok(Timespec { tv_sec: t.tv_sec as i64, tv_nsec }),
            _ => Err(Errno::EINVAL),
        }
    }

    pub fn checked_add_duration(&self, other: &Duration) -> Option<Timespec> {
        let mut secs = self.tv_sec.checked_add_unsigned(other.as_secs())?;

        // Nano calculations can't overflow because nanos are <1B which fit
        // in a u32.
        let mut nsec = other.subsec_nanos() + self.tv_nsec;
        if nsec >= NSEC_PER_SEC {
            nsec -= NSEC_PER_SEC;
            secs = secs.checked_add(1)?;
        }
        Some(Timespec { tv_sec: secs, tv_nsec: nsec })
    }

    /// Computes `now + timeout` on `clock`.
    ///
    /// Returns `Ok(None)` when the deadline is not representable, which callers
    /// treat as an unbounded wait.
    pub fn deadline(clock: nc::clockid_t, timeout: &Duration) -> Result<Option<Timespec>, Errno> {
        Ok(Timespec::now(clock)?.checked_add_duration(timeout))
    }

    pub fn to_timespec(&self) -> Option<timespec_t> {
        Some(timespec_t {
            tv_sec: self.tv_sec.try_into().ok()?,
            tv_nsec: self.tv_nsec.try_into().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_carries_nanoseconds() {
        let t = Timespec { tv_sec: 1, tv_nsec: 900_000_000 };
        let sum = t.checked_add_duration(&Duration::from_millis(250)).unwrap();
        assert_eq!(sum, Timespec { tv_sec: 2, tv_nsec: 150_000_000 });
    }

    #[test]
    fn add_overflow_is_none() {
        let t = Timespec { tv_sec: i64::MAX, tv_nsec: 999_999_999 };
        assert!(t.checked_add_duration(&Duration::from_nanos(1)).is_none());
        assert!(t.checked_add_duration(&Duration::from_secs(u64::MAX)).is_none());
    }

    #[test]
    fn now_moves_forward() {
        let a = Timespec::now(nc::CLOCK_MONOTONIC).unwrap();
        let b = Timespec::now(nc::CLOCK_MONOTONIC).unwrap();
        assert!(b >= a);
    }

    #[test]
    fn unknown_clock_is_rejected() {
        assert!(Timespec::now(1000).is_err());
    }
}
