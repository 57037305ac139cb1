mod condvar;
mod futex;
mod mutex;
mod thread;
mod timespec;

pub(crate) use condvar::{Condvar, WaitError};
pub(crate) use mutex::Mutex;
pub(crate) use thread::fifo_priority_range;
