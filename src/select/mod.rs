//! Multi-way atomic commit over several suspend points (`spec.md` §4.7).
//!
//! Every suspend point in this crate (channel send/receive, semaphore
//! acquire) already commits atomically through
//! [`crate::continuation::ResumeHandle::try_resume`]'s single CAS-shaped
//! decision cell — at most one caller ever observes `Ok(())` from a given
//! handle. That means a "select" over several such suspend points does not
//! need its own commit protocol: racing their futures and keeping whichever
//! resolves first, while dropping the rest *before they have resolved*, is
//! already atomic.
//!
//! Dropping a losing clause still has to tear down its registration
//! (`spec.md` §4.7 phase 3 "dispose all other registered clauses"), not just
//! stop polling it — a channel receive waiter left sitting in
//! `Inner::receive_waiters` after its future is gone would still be
//! `try_resume`-able by a later sender, delivering a value to a clause
//! nobody is polling anymore. [`crate::continuation::CancellableContinuation`]'s
//! `Drop` handles this directly: it marks its decision cell `Disposed` if it
//! was still undecided, so any later `try_resume` against the handle a
//! queue is still holding fails instead of silently succeeding.
//!
//! Callers unify heterogeneous clause types the same way
//! `futures::select!` callers do: map each clause future to a common output
//! type (typically an enum with one variant per clause) before passing it
//! in.

use std::pin::Pin;

use crate::future::BoxFuture;

/// Polls every clause, returns the first to complete, and drops the rest
/// without ever polling them again. `spec.md` §4.7 "first clause to become
/// ready wins; the others' registrations are cleanly torn down".
///
/// Panics if `clauses` is empty.
pub async fn select<'a, T>(clauses: Vec<BoxFuture<'a, T>>) -> T {
    assert!(!clauses.is_empty(), "select requires at least one clause");
    SelectFuture { clauses }.await
}

struct SelectFuture<'a, T> {
    clauses: Vec<BoxFuture<'a, T>>,
}

impl<'a, T> std::future::Future for SelectFuture<'a, T> {
    type Output = T;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<T> {
        let this = self.get_mut();
        for i in 0..this.clauses.len() {
            if let std::task::Poll::Ready(value) = this.clauses[i].as_mut().poll(cx) {
                return std::task::Poll::Ready(value);
            }
        }
        std::task::Poll::Pending
    }
}

/// Races exactly two clauses of possibly-different types, unifying them
/// into `Either`. The common two-way case (`spec.md` §8 scenario shape
/// "whichever of these two suspend points unblocks first").
pub enum Either<A, B> {
    Left(A),
    Right(B),
}

pub async fn select2<'a, A: Send + 'a, B: Send + 'a>(
    left: BoxFuture<'a, A>,
    right: BoxFuture<'a, B>,
) -> Either<A, B> {
    let left: BoxFuture<'a, Either<A, B>> = Box::pin(async move { Either::Left(left.await) });
    let right: BoxFuture<'a, Either<A, B>> = Box::pin(async move { Either::Right(right.await) });
    select(vec![left, right]).await
}
