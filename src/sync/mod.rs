//! Linux no_libc synchronization primitives.
//!
//! ## Higher-level synchronization objects
//!
//! The building blocks, leaves first:
//!
//! - [`Lock`]: Mutual Exclusion mechanism, which ensures that at
//!   most one thread at a time is able to access some data. Its
//!   [`LockKind`] decides what happens when the holder locks it again.
//!   Unlike the
//!   [std equivalent](https://doc.rust-lang.org/std/sync/struct.Mutex.html),
//!   it does not have a poison mechanism.
//!
//! - [`Condvar`]: Condition Variable bound to one [`Lock`], providing the
//!   ability to block a thread while waiting for an event to occur.
//!
//! - [`WaitGroup`]: A counter of outstanding work that threads can wait
//!   on until it reaches zero.
//!
//! - [`OnceGuard`]: Runs a unit of work at most once across concurrent
//!   callers.
//!
//! [`Lock`]: Lock
//! [`Condvar`]: Condvar
//! [`WaitGroup`]: WaitGroup
//! [`OnceGuard`]: OnceGuard

mod condvar;
mod lock;
mod once;
mod wait_group;

pub use condvar::Condvar;
pub use condvar::WaitOutcome;
pub use lock::Lock;
pub use lock::LockAttributes;
pub use lock::LockGuard;
pub use lock::LockKind;
pub use lock::LockOutcome;
pub use once::OnceGuard;
pub use wait_group::WaitGroup;
