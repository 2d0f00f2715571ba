//! Dispatched tasks: the unit of work a [`super::Dispatcher`] actually runs
//! (`spec.md` §4.3).
//!
//! `spec.md` enumerates five resume modes a continuation can be dispatched
//! under. Most of this crate only ever needs three of them in practice
//! (`Atomic`, `Cancellable`, `Undispatched`); `CancellableReusable` exists for
//! the segment-queue waiter cells that get recycled across many suspend
//! points on the same job, and `Uninitialised` is the sentinel a
//! [`DispatchedTask`] starts in before a resume value is attached.

use std::any::Any;
use std::sync::Arc;

use crate::error::JobCause;
use crate::job::Job;

/// How a dispatched resumption should behave with respect to cancellation
/// (`spec.md` §4.3 "Resume modes").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeMode {
    /// Runs to completion even if the owning job is cancelled mid-flight;
    /// used for cleanup continuations (`finally`-style code) that must not
    /// observe a half-finished resumption.
    Atomic,
    /// Checked for cancellation before running; if the job is already
    /// cancelled, the body is skipped and the cancellation is delivered
    /// instead. This is the default for ordinary suspend points.
    Cancellable,
    /// Like `Cancellable`, but the underlying continuation cell is reused
    /// for a subsequent suspend rather than being torn down — the segment
    /// queue's waiter cells use this to avoid reallocating per-element.
    CancellableReusable,
    /// Runs inline on the calling thread without going through
    /// `Dispatcher::dispatch` at all (`spec.md` §4.2 "undispatched start").
    Undispatched,
    /// No resume value attached yet; a [`DispatchedTask`] sits here only
    /// between construction and its first `attach_resume` call.
    Uninitialised,
}

enum Payload {
    None,
    Success(Arc<dyn Any + Send + Sync>),
    Failure(JobCause),
}

/// Pairs a resumption payload with the job it resumes into and the mode it
/// should run under, ready to be handed to a [`super::Dispatcher`] as a
/// [`super::Runnable`].
pub struct DispatchedTask {
    job: Job,
    mode: ResumeMode,
    payload: Payload,
}

impl DispatchedTask {
    pub fn uninitialised(job: Job) -> Self {
        DispatchedTask {
            job,
            mode: ResumeMode::Uninitialised,
            payload: Payload::None,
        }
    }

    pub fn attach_success(&mut self, mode: ResumeMode, value: Arc<dyn Any + Send + Sync>) {
        self.mode = mode;
        self.payload = Payload::Success(value);
    }

    pub fn attach_failure(&mut self, mode: ResumeMode, cause: JobCause) {
        self.mode = mode;
        self.payload = Payload::Failure(cause);
    }

    pub fn mode(&self) -> ResumeMode {
        self.mode
    }

    /// Runs the resumption: delivers the attached payload to the job's
    /// completion machinery, honoring the resume mode's cancellation
    /// sensitivity.
    pub fn run(self) {
        if self.mode != ResumeMode::Atomic && self.job.is_cancelled() {
            return;
        }
        match self.payload {
            Payload::None => {}
            Payload::Success(value) => self.job.complete_success(value),
            Payload::Failure(JobCause::Failed(err)) => self.job.complete_failure(err),
            Payload::Failure(JobCause::Cancelled(cause)) => {
                self.job.cancel(cause);
            }
        }
    }

    pub fn into_runnable(self) -> super::Runnable {
        Box::new(move || self.run())
    }
}
