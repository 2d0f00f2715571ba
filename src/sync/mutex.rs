//! A suspending mutual-exclusion lock (`spec.md` §4.8), implemented as a
//! binary [`Semaphore`].

use std::sync::Arc;

use parking_lot::Mutex as StdMutex;

use crate::error::JobCause;
use crate::job::Job;

use super::semaphore::{Semaphore, SemaphorePermit};

struct OwnerSlot(StdMutex<Option<u64>>);

/// A mutex whose `lock` suspends the caller instead of blocking a thread.
/// Locking from the same [`Job`] that already holds the lock is rejected
/// rather than deadlocking, mirroring kotlinx's `Mutex` re-entrancy check —
/// this lock is not reentrant.
pub struct Mutex {
    semaphore: Semaphore,
    owner: Arc<OwnerSlot>,
}

impl Mutex {
    pub fn new() -> Self {
        Mutex {
            semaphore: Semaphore::new(1),
            owner: Arc::new(OwnerSlot(StdMutex::new(None))),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.owner.0.lock().is_some()
    }

    /// Suspends until the lock is free, then holds it until the returned
    /// guard is dropped.
    pub async fn lock(&self, job: Option<&Job>) -> Result<MutexGuard, MutexError> {
        if let (Some(job), Some(owner)) = (job, *self.owner.0.lock()) {
            if job.id() == owner {
                return Err(MutexError::AlreadyLockedByCaller);
            }
        }
        let permit = self
            .semaphore
            .acquire(job)
            .await
            .map_err(MutexError::Cancelled)?;
        *self.owner.0.lock() = job.map(Job::id);
        Ok(MutexGuard {
            permit: Some(permit),
            owner: self.owner.clone(),
        })
    }

    pub fn try_lock(&self, job: Option<&Job>) -> Option<MutexGuard> {
        let permit = self.semaphore.try_acquire()?;
        *self.owner.0.lock() = job.map(Job::id);
        Some(MutexGuard {
            permit: Some(permit),
            owner: self.owner.clone(),
        })
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MutexError {
    #[error("this job already holds the lock")]
    AlreadyLockedByCaller,
    #[error("lock acquisition was cancelled: {0}")]
    Cancelled(JobCause),
}

/// Holds the lock until dropped.
pub struct MutexGuard {
    permit: Option<SemaphorePermit>,
    owner: Arc<OwnerSlot>,
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        *self.owner.0.lock() = None;
        self.permit.take();
    }
}
