//! Cancellable continuations (`spec.md` §4.6).
//!
//! A [`CancellableContinuation`] is the primitive every suspend point in this
//! crate (channel send/receive, semaphore acquire, delay) is built from: a
//! single-resumption future that a dispatcher parks a `Waker` into, and that
//! the owning [`Job`] can tear down early on cancellation. It implements
//! `Future` itself — `poll` *is* the suspend point — rather than exposing a
//! callback-based API, since that is the natural Rust shape for "the thing
//! you `.await`".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::JobCause;
use crate::job::{Disposable, Job};

enum Decision<T> {
    Undecided,
    /// The continuation was resumed with a value before anybody polled it,
    /// or after a poll parked a waker.
    Resumed(T),
    /// The owning job was cancelled before resumption; `poll` will return
    /// `Poll::Ready` so the caller can propagate the cancellation (`spec.md`
    /// §4.6 "prompt cancellation").
    Cancelled(JobCause),
    /// Somebody is currently polling and waiting on a waker.
    Waiting(Waker),
    /// The continuation was dropped while still undecided — typically a
    /// losing `select` clause torn down before it ever resolved (`spec.md`
    /// §4.7 phase 3 "dispose all other registered clauses"). A registration
    /// left behind in a queue (a channel's waiter list, a semaphore's waiter
    /// list) still has a `ResumeHandle` pointing at this cell; this state
    /// makes any later `try_resume` against it fail instead of silently
    /// succeeding into a future nobody is polling anymore.
    Disposed,
}

struct Inner<T> {
    decision: Mutex<Decision<T>>,
}

/// The outcome delivered to an `.await`er of a [`CancellableContinuation`].
pub enum Resumption<T> {
    Value(T),
    Cancelled(JobCause),
}

/// A single-resumption suspend point, optionally tied to a [`Job`] so that
/// cancelling the job cancels the continuation (`spec.md` §4.6 invariant:
/// "a continuation outlives at most one resume or one cancel, never both").
pub struct CancellableContinuation<T> {
    inner: Arc<Inner<T>>,
    cancel_handle: Option<Disposable>,
    on_cancellation: Option<Box<dyn FnOnce(&JobCause) + Send>>,
}

/// A detached handle a producer uses to resume the continuation from
/// elsewhere — the `poll`-side `CancellableContinuation` is consumed by
/// `.await`, so whoever is supposed to wake it later needs its own handle.
#[derive(Clone)]
pub struct ResumeHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> CancellableContinuation<T> {
    /// Creates a continuation. When `job` is given, the continuation
    /// auto-cancels if the job is cancelled while suspended.
    pub fn new(job: Option<&Job>) -> (Self, ResumeHandle<T>) {
        let inner = Arc::new(Inner {
            decision: Mutex::new(Decision::Undecided),
        });
        let cancel_handle = job.map(|job| {
            let inner = inner.clone();
            job.invoke_on_completion(true, move |cause| {
                if let Some(cause) = cause {
                    let mut guard = inner.decision.lock();
                    if matches!(&*guard, Decision::Undecided | Decision::Waiting(_)) {
                        let waker = match std::mem::replace(&mut *guard, Decision::Cancelled(cause.clone())) {
                            Decision::Waiting(w) => Some(w),
                            _ => None,
                        };
                        drop(guard);
                        if let Some(waker) = waker {
                            waker.wake();
                        }
                    }
                }
            })
        });
        (
            CancellableContinuation {
                inner: inner.clone(),
                cancel_handle,
                on_cancellation: None,
            },
            ResumeHandle { inner },
        )
    }

    /// Registers a callback invoked if this continuation ends up cancelled
    /// instead of resumed — used by channel send to return an undelivered
    /// element to the caller, and by semaphore acquire to release the permit
    /// it never got to use (`spec.md` §4.9 "cancellation during delivery").
    pub fn invoke_on_cancellation(&mut self, f: impl FnOnce(&JobCause) + Send + 'static) {
        self.on_cancellation = Some(Box::new(f));
    }
}

impl<T> ResumeHandle<T> {
    /// Attempts to move the continuation from `Undecided`/`Waiting` to
    /// `Resumed`. Returns `false` if it was already decided (resumed or
    /// cancelled) by someone else — the two-step try/commit handshake
    /// [`crate::select`] needs to make a multi-way choice atomic.
    pub fn try_resume(&self, value: T) -> Result<(), T> {
        let mut guard = self.inner.decision.lock();
        match &*guard {
            Decision::Undecided | Decision::Waiting(_) => {
                let waker = match std::mem::replace(&mut *guard, Decision::Resumed(value)) {
                    Decision::Waiting(w) => Some(w),
                    _ => None,
                };
                drop(guard);
                if let Some(waker) = waker {
                    waker.wake();
                }
                Ok(())
            }
            _ => Err(value),
        }
    }
}

impl<T> Future for CancellableContinuation<T>
where
    T: Unpin,
{
    type Output = Resumption<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut guard = this.inner.decision.lock();
        match &*guard {
            Decision::Undecided => {
                *guard = Decision::Waiting(cx.waker().clone());
                Poll::Pending
            }
            Decision::Waiting(w) if !w.will_wake(cx.waker()) => {
                *guard = Decision::Waiting(cx.waker().clone());
                Poll::Pending
            }
            Decision::Waiting(_) => Poll::Pending,
            Decision::Resumed(_) => {
                let Decision::Resumed(value) =
                    std::mem::replace(&mut *guard, Decision::Undecided)
                else {
                    unreachable!()
                };
                drop(guard);
                if let Some(handle) = this.cancel_handle.take() {
                    handle.dispose();
                }
                Poll::Ready(Resumption::Value(value))
            }
            Decision::Cancelled(_) => {
                let Decision::Cancelled(cause) =
                    std::mem::replace(&mut *guard, Decision::Undecided)
                else {
                    unreachable!()
                };
                drop(guard);
                if let Some(cb) = this.on_cancellation.take() {
                    cb(&cause);
                }
                if let Some(handle) = this.cancel_handle.take() {
                    handle.dispose();
                }
                Poll::Ready(Resumption::Cancelled(cause))
            }
            // Nobody can poll a continuation after it has been dropped.
            Decision::Disposed => unreachable!("a disposed continuation is never polled again"),
        }
    }
}

impl<T> Drop for CancellableContinuation<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.cancel_handle.take() {
            handle.dispose();
        }
        let mut guard = self.inner.decision.lock();
        if matches!(&*guard, Decision::Undecided | Decision::Waiting(_)) {
            *guard = Decision::Disposed;
        }
    }
}
