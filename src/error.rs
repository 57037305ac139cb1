use core::fmt;
use syscalls::Errno;

/// A raw errno value reported by the kernel.
///
/// Displays as the errno description followed by its number, for example
/// `Resource deadlock avoided (#35)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// The raw errno number.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl From<Errno> for ErrorCode {
    fn from(errno: Errno) -> Self {
        ErrorCode(errno.into_raw())
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Errno::new(self.0), f)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = Errno::new(self.0).description().unwrap_or("Unknown error");
        write!(f, "{description} (#{})", self.0)
    }
}

/// The ways an operation on one of the synchronization primitives can fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A [`Lock`](crate::sync::Lock) could not be set up with the requested
    /// attributes.
    #[error("lock initialization failed: {code}")]
    Init { code: ErrorCode },
    /// A [`Lock`](crate::sync::Lock) was torn down while still locked.
    #[error("lock destruction failed: {code}")]
    Destroy { code: ErrorCode },
    #[error("lock acquisition failed: {code}")]
    Acquire { code: ErrorCode },
    #[error("lock release failed: {code}")]
    Release { code: ErrorCode },
    /// A timed operation was given a zero timeout.
    #[error("timeout must be > 0")]
    InvalidTimeout,
    #[error("priority ceiling operation failed: {code}")]
    PriorityCeiling { code: ErrorCode },
    #[error("condition variable initialization failed: {code}")]
    ConditionInit { code: ErrorCode },
    #[error("condition variable wait failed: {code}")]
    ConditionWait { code: ErrorCode },
    #[error("condition variable signal failed: {code}")]
    ConditionSignal { code: ErrorCode },
    #[error("condition variable broadcast failed: {code}")]
    ConditionBroadcast { code: ErrorCode },
    /// A [`WaitGroup`](crate::sync::WaitGroup) counter would have dropped
    /// below zero. `count` is the value the rejected change would have
    /// produced.
    #[error("negative wait group count encountered: count={count}")]
    NegativeCounter { count: i64 },
    /// A [`WaitGroup`](crate::sync::WaitGroup) counter would have overflowed.
    #[error("wait group count overflowed: count={count}, delta={delta}")]
    CounterOverflow { count: i64, delta: i64 },
}

impl Error {
    /// The errno carried by this error, if it came from the kernel.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match *self {
            Error::Init { code }
            | Error::Destroy { code }
            | Error::Acquire { code }
            | Error::Release { code }
            | Error::PriorityCeiling { code }
            | Error::ConditionInit { code }
            | Error::ConditionWait { code }
            | Error::ConditionSignal { code }
            | Error::ConditionBroadcast { code } => Some(code.raw()),
            Error::InvalidTimeout | Error::NegativeCounter { .. } | Error::CounterOverflow { .. } => {
                None
            }
        }
    }
}

/// A type alias for results of operations on the synchronization primitives.
pub type Result<T> = core::result::Result<T, Error>;

/// Hands a failure that has no caller to propagate to (a destructor, or the
/// release at the end of a scoped acquisition) to the log sink.
pub(crate) fn report(component: &str, operation: &str, error: &Error) {
    log::error!("{component}.{operation} failed: {error}");
}
