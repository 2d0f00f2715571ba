//! Synchronization primitives built atop the channel waiter mechanism
//! (`spec.md` §4.8 "Semaphore & mutex").

mod mutex;
mod semaphore;

pub use mutex::{Mutex, MutexError, MutexGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
