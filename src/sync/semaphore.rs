//! A counting semaphore whose waiters are continuations, not OS threads
//! (`spec.md` §4.8).
//!
//! Release and a racing acquire-cancellation are reconciled the same way a
//! channel send reconciles with a racing receive-cancellation: releasing a
//! permit to a waiting continuation uses the resume handle's `try_resume`,
//! and a `try_resume` that loses the race (because the waiter just
//! cancelled) simply tries the next waiter — a bounded number of retries
//! since each failed attempt permanently removes one dead waiter.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::continuation::{CancellableContinuation, Resumption};
use crate::error::JobCause;
use crate::job::Job;

struct Inner {
    available: Mutex<isize>,
    waiters: Mutex<std::collections::VecDeque<crate::continuation::ResumeHandle<()>>>,
}

/// A semaphore with `permits` initial permits. Acquiring when none are
/// available suspends the caller rather than blocking a thread.
pub struct Semaphore {
    inner: Arc<Inner>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            inner: Arc::new(Inner {
                available: Mutex::new(permits as isize),
                waiters: Mutex::new(std::collections::VecDeque::new()),
            }),
        }
    }

    pub fn available_permits(&self) -> usize {
        (*self.inner.available.lock()).max(0) as usize
    }

    /// Acquires a permit, suspending if none is currently available.
    pub async fn acquire(&self, job: Option<&Job>) -> Result<SemaphorePermit, JobCause> {
        {
            let mut available = self.inner.available.lock();
            if *available > 0 {
                *available -= 1;
                return Ok(SemaphorePermit {
                    inner: self.inner.clone(),
                });
            }
        }

        let (cont, resume) = CancellableContinuation::new(job);
        self.inner.waiters.lock().push_back(resume);

        match cont.await {
            Resumption::Value(()) => Ok(SemaphorePermit {
                inner: self.inner.clone(),
            }),
            Resumption::Cancelled(cause) => Err(cause),
        }
    }

    /// Non-suspending acquire; fails immediately if no permit is free.
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        let mut available = self.inner.available.lock();
        if *available > 0 {
            *available -= 1;
            Some(SemaphorePermit {
                inner: self.inner.clone(),
            })
        } else {
            None
        }
    }

    fn release(&self) {
        loop {
            let waiter = self.inner.waiters.lock().pop_front();
            match waiter {
                Some(waiter) => {
                    if waiter.try_resume(()).is_ok() {
                        return; // permit transferred directly, no count change
                    }
                    // that waiter had already cancelled; try the next one
                }
                None => {
                    *self.inner.available.lock() += 1;
                    return;
                }
            }
        }
    }
}

/// An acquired permit; releasing happens on drop.
pub struct SemaphorePermit {
    inner: Arc<Inner>,
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        Semaphore {
            inner: self.inner.clone(),
        }
        .release();
    }
}
