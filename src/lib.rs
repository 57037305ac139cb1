/*!
Mutual-exclusion locks, condition variables, wait groups and once guards for
Linux, all without the use of libc. Instead, they are built on futexes through
direct Linux syscalls.

Every fallible operation returns a [`Result`] with a typed [`Error`] carrying
the errno it came from. Failures that happen where nothing can receive an
error, such as the release performed when a guard is dropped or the teardown
of a lock that is still held, are written to the [`log`] facade as
`<component>.<operation> failed: <error>`. Install a logger before first use
to see them.

# Crate features

* **not_process_private** -
  Allows for sharing the synchronization primitives with other processes.
*/

#![cfg(target_os = "linux")]
#![cfg_attr(not(test), no_std)]

mod error;
pub mod sync;
mod sys;
#[cfg(test)]
mod tests;

pub use error::{Error, ErrorCode, Result};
