use core::cell::Cell;
use core::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use syscalls::Errno;

use super::{capture_logs, logged_lines, make_total};
use crate::sync::{Lock, LockAttributes, LockKind, LockOutcome};
use crate::{Error, ErrorCode};

const KINDS: [LockKind; 4] = [LockKind::Default, LockKind::Normal, LockKind::ErrorCheck, LockKind::Recursive];

#[derive(Eq, PartialEq, Debug)]
struct NonCopy(i32);

#[test]
fn smoke() {
    let m = Lock::new(());
    drop(m.acquire().unwrap());
    drop(m.acquire().unwrap());
}

#[test]
fn fresh_lock_is_unheld() {
    for kind in KINDS {
        let m = Lock::with_kind((), kind);
        assert!(m.try_acquire().unwrap().is_acquired(), "{kind:?}");
        assert!(!m.is_held().unwrap(), "{kind:?}");
    }
}

#[test]
fn lots_and_lots() {
    const J: u32 = 1000;
    const K: u32 = 3;

    fn inc(m: &Lock<Cell<u32>>) {
        for _ in 0..J {
            m.with_lock(|c| c.set(c.get() + 1)).unwrap();
        }
    }

    for kind in KINDS {
        let m = Arc::new(Lock::with_kind(Cell::new(0), kind));

        let (tx, rx) = channel();
        for _ in 0..2 * K {
            let tx2 = tx.clone();
            let m2 = m.clone();
            thread::spawn(move || {
                inc(&m2);
                tx2.send(()).unwrap();
            });
        }

        drop(tx);
        for _ in 0..2 * K {
            rx.recv().unwrap();
        }
        assert_eq!(m.acquire().unwrap().get(), J * K * 2, "{kind:?}");
    }
}

fn sum_under_lock(count: u64) {
    let total = Arc::new(Lock::new(Cell::new(0u64)));

    let handles: Vec<_> = (0..count)
        .map(|i| {
            let total = Arc::clone(&total);
            thread::spawn(move || total.with_lock(|t| t.set(t.get() + i)).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(total.with_lock(Cell::get).unwrap(), make_total(count));
}

#[test]
fn mutual_exclusion_zero() {
    sum_under_lock(0);
}

#[test]
fn mutual_exclusion_ten() {
    sum_under_lock(10);
}

#[test]
fn mutual_exclusion_hundred() {
    sum_under_lock(100);
}

#[test]
fn try_acquire() {
    let m = Lock::new(());
    let guard = m.try_acquire().unwrap().acquired().unwrap();
    assert!(m.is_held().unwrap());
    drop(guard);
    assert!(!m.is_held().unwrap());
}

#[test]
fn try_acquire_while_holding() {
    for kind in [LockKind::Default, LockKind::Normal, LockKind::ErrorCheck] {
        let m = Lock::with_kind((), kind);
        let _guard = m.acquire().unwrap();
        assert!(m.try_acquire().unwrap().is_busy(), "{kind:?}");
        assert!(m.is_held().unwrap(), "{kind:?}");
    }

    let m = Lock::with_kind((), LockKind::Recursive);
    let _guard = m.acquire().unwrap();
    assert!(m.try_acquire().unwrap().is_acquired());
}

#[test]
fn error_check_relock_is_reported() {
    let m = Lock::with_kind((), LockKind::ErrorCheck);
    let _guard = m.acquire().unwrap();

    let deadlock = Error::Acquire { code: Errno::EDEADLK.into() };
    assert_eq!(m.acquire().unwrap_err(), deadlock);
    assert!(m.try_acquire().unwrap().is_busy());
}

#[test]
fn error_check_timed_relock_times_out() {
    let m = Lock::with_kind((), LockKind::ErrorCheck);
    let guard = m.acquire().unwrap();

    let timeout = Duration::from_millis(50);
    let start = Instant::now();
    assert!(m.try_acquire_for(timeout).unwrap().is_busy());
    assert!(start.elapsed() >= timeout);

    // Still held once, by us.
    guard.release().unwrap();
    assert!(!m.is_held().unwrap());
}

#[test]
fn recursive_needs_every_release() {
    let m = Arc::new(Lock::with_kind(Cell::new(0), LockKind::Recursive));

    let busy_elsewhere = |m: &Arc<Lock<Cell<i32>>>| {
        let m = Arc::clone(m);
        thread::spawn(move || m.try_acquire().unwrap().is_busy()).join().unwrap()
    };

    let outer = m.acquire().unwrap();
    let inner = m.acquire().unwrap();
    inner.set(1);
    assert_eq!(outer.get(), 1);

    drop(inner);
    assert!(busy_elsewhere(&m));
    outer.release().unwrap();
    assert!(!busy_elsewhere(&m));
}

#[test]
fn zero_timeout_is_invalid() {
    for kind in KINDS {
        let m = Lock::with_kind((), kind);
        assert_eq!(m.try_acquire_for(Duration::ZERO).unwrap_err(), Error::InvalidTimeout);
        assert_eq!(
            m.with_try_lock_for(Duration::ZERO, |_| ()).unwrap_err(),
            Error::InvalidTimeout
        );
    }
}

#[test]
fn timed_acquire_waits_out_the_timeout() {
    let m = Arc::new(Lock::new(()));
    let (held_tx, held_rx) = channel();
    let (release_tx, release_rx) = channel::<()>();

    let m2 = Arc::clone(&m);
    let holder = thread::spawn(move || {
        let _guard = m2.acquire().unwrap();
        held_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    });

    held_rx.recv().unwrap();
    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    assert!(m.try_acquire_for(timeout).unwrap().is_busy());
    assert!(start.elapsed() >= timeout);

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    assert!(m.try_acquire_for(timeout).unwrap().is_acquired());
}

#[test]
fn timed_relock_by_holder_times_out() {
    let m = Lock::new(());
    let _guard = m.acquire().unwrap();

    let timeout = Duration::from_millis(50);
    let start = Instant::now();
    assert!(m.try_acquire_for(timeout).unwrap().is_busy());
    assert!(start.elapsed() >= timeout);
}

#[test]
fn timed_acquire_succeeds_once_released() {
    let m = Arc::new(Lock::new(Cell::new("")));
    let (held_tx, held_rx) = channel();

    let m2 = Arc::clone(&m);
    let holder = thread::spawn(move || {
        m2.with_lock(|_| {
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
        })
        .unwrap();
    });

    held_rx.recv().unwrap();
    assert!(m.is_held().unwrap());

    let outcome = m
        .with_try_lock_for(Duration::from_millis(2000), |s| {
            s.set("done");
            s.get()
        })
        .unwrap();
    assert_eq!(outcome, LockOutcome::Acquired("done"));
    holder.join().unwrap();
}

#[test]
fn with_try_lock_skips_body_when_busy() {
    let m = Lock::new(Cell::new(0));
    let outcome = m.with_try_lock(|c| c.replace(1)).unwrap();
    assert_eq!(outcome, LockOutcome::Acquired(0));

    let _guard = m.acquire().unwrap();
    let mut ran = false;
    let outcome = m.with_try_lock(|_| ran = true).unwrap();
    assert_eq!(outcome, LockOutcome::Busy);
    assert!(!ran);
}

#[test]
fn with_lock_releases_on_panic() {
    let m = Lock::new(Cell::new(0));
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        m.with_lock(|c| {
            c.set(1);
            panic!("body failed");
        })
    }));
    assert!(result.is_err());
    assert!(!m.is_held().unwrap());
    assert_eq!(m.with_lock(Cell::get).unwrap(), 1);
}

#[test]
fn test_mutex_arc_access_in_unwind() {
    let arc = Arc::new(Lock::new(Cell::new(1)));
    let arc2 = arc.clone();
    let _ = thread::spawn(move || -> () {
        struct Unwinder {
            i: Arc<Lock<Cell<i32>>>,
        }
        impl Drop for Unwinder {
            fn drop(&mut self) {
                self.i.with_lock(|i| i.set(i.get() + 1)).unwrap();
            }
        }
        let _u = Unwinder { i: arc2 };
        panic!();
    })
    .join();
    assert_eq!(arc.acquire().unwrap().get(), 2);
}

#[test]
fn priority_ceiling_needs_configuring() {
    let m = Lock::new(());
    let invalid = Error::PriorityCeiling { code: Errno::EINVAL.into() };
    assert_eq!(m.priority_ceiling().unwrap_err(), invalid);
    assert_eq!(m.set_priority_ceiling(10).unwrap_err(), invalid);
}

#[test]
fn priority_ceiling_round_trip() {
    let attributes = LockAttributes { kind: LockKind::ErrorCheck, priority_ceiling: Some(10) };
    let m = Lock::with_attributes((), attributes).unwrap();
    assert_eq!(m.kind(), LockKind::ErrorCheck);
    assert_eq!(m.priority_ceiling().unwrap(), 10);
    assert_eq!(m.set_priority_ceiling(20).unwrap(), 10);
    assert_eq!(m.priority_ceiling().unwrap(), 20);
    assert!(!m.is_held().unwrap());

    let out_of_range = Error::PriorityCeiling { code: Errno::EINVAL.into() };
    assert_eq!(m.set_priority_ceiling(1000).unwrap_err(), out_of_range);
    assert_eq!(m.priority_ceiling().unwrap(), 20);
}

#[test]
fn priority_ceiling_out_of_range_fails_init() {
    let attributes = LockAttributes { priority_ceiling: Some(-5), ..LockAttributes::default() };
    let err = Lock::with_attributes((), attributes).unwrap_err();
    assert_eq!(err, Error::Init { code: Errno::EINVAL.into() });
}

#[test]
fn leaked_guard_is_reported_on_drop() {
    capture_logs();
    let m = Lock::new(());
    mem::forget(m.acquire().unwrap());
    drop(m);

    let lines = logged_lines();
    assert!(
        lines.iter().any(|l| l.starts_with("Lock.drop failed: lock destruction failed: ")),
        "{lines:?}"
    );
}

#[test]
fn errors_carry_their_code() {
    let code = ErrorCode::from(Errno::EDEADLK);
    let err = Error::Acquire { code };
    assert_eq!(err.code(), Some(Errno::EDEADLK.into_raw()));
    let text = err.to_string();
    assert!(text.starts_with("lock acquisition failed: "), "{text}");
    assert!(text.ends_with(&format!("(#{})", code.raw())), "{text}");

    assert_eq!(Error::InvalidTimeout.code(), None);
    assert_eq!(Error::CounterOverflow { count: 1, delta: i64::MAX }.code(), None);
    assert_eq!(Error::InvalidTimeout.to_string(), "timeout must be > 0");
    assert_eq!(
        Error::NegativeCounter { count: -2 }.to_string(),
        "negative wait group count encountered: count=-2"
    );
}

#[test]
fn debug_shows_locked() {
    let m = Lock::new(5);
    assert_eq!(format!("{m:?}"), "Lock { kind: Default, data: 5, .. }");
    let _guard = m.acquire().unwrap();
    assert_eq!(format!("{m:?}"), "Lock { kind: Default, data: <locked>, .. }");
}

#[test]
fn test_into_inner() {
    let m = Lock::new(NonCopy(10));
    assert_eq!(m.into_inner(), NonCopy(10));
}

#[test]
fn test_get_mut() {
    let mut m = Lock::new(NonCopy(10));
    *m.get_mut() = NonCopy(20);
    assert_eq!(m.into_inner(), NonCopy(20));
}

#[test]
fn test_lock_unsized() {
    let lock: &Lock<[Cell<i32>]> = &Lock::new([Cell::new(1), Cell::new(2), Cell::new(3)]);
    {
        let b = lock.acquire().unwrap();
        b[0].set(4);
        b[2].set(5);
    }
    let values: Vec<i32> = lock.acquire().unwrap().iter().map(Cell::get).collect();
    assert_eq!(values, [4, 2, 5]);
}
