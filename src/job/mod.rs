//! The job state machine (`spec.md` §3.2, §3.3, §4.5).
//!
//! A [`Job`] is a cheaply-`Clone`-able handle (`Arc`-backed) to the shared
//! lifecycle state of one coroutine. All transitions are made under a single
//! `parking_lot::Mutex` guarding the whole state; nothing ever awaits while
//! holding it, so the lock is held only for plain pointer/`Vec` bookkeeping —
//! the atomic-CAS state machine `spec.md` describes and this coarse-locked
//! one are observationally equivalent to every caller, which is the bar
//! `spec.md` §9 sets for dropping the tagged-pointer trick.

mod state;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{AppError, CancellationCause, ExceptionHandler, JobCause};
use state::{ChildEntry, FinishingState, HandlerEntry, JobState, Outcome};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

struct JobInner {
    id: u64,
    name: Option<Arc<str>>,
    /// Supervisor jobs absorb child failures instead of cancelling siblings
    /// and themselves (`spec.md` §4.5 "Exception aggregation").
    supervisor: bool,
    /// `launch`-style jobs report an unhandled failure to the exception
    /// handler once, since nobody is expected to retrieve it via `await`.
    /// `async`-style jobs (the `Job` backing a `Deferred`) leave this false:
    /// the failure is delivered only when/if `await` is called.
    reports_uncaught: bool,
    parent: Option<Job>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    state: Mutex<JobState>,
    next_id: AtomicU64,
    on_start: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// A handle to a job's shared state. Clone is `O(1)` (`Arc` bump).
#[derive(Clone)]
pub struct Job(Arc<JobInner>);

/// A non-owning reference to a job, used for the child → parent back-edge so
/// the parent/child graph never keeps a subtree alive purely through strong
/// references (`spec.md` §9 "Handler list cycles").
#[derive(Clone)]
pub struct WeakJob(Weak<JobInner>);

impl WeakJob {
    pub fn upgrade(&self) -> Option<Job> {
        self.0.upgrade().map(Job)
    }
}

/// A one-shot unregistration token, returned by [`Job::invoke_on_completion`]
/// and [`Job::attach_child`]. Disposing a second time, or after the handler
/// already fired, is a no-op.
pub struct Disposable {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposable {
    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Disposable {
            dispose: Some(Box::new(f)),
        }
    }

    pub fn noop() -> Self {
        Disposable { dispose: None }
    }

    pub fn dispose(mut self) {
        if let Some(f) = self.dispose.take() {
            f();
        }
    }

    /// Composes two disposables into one that disposes both, in order
    /// (`spec.md` §4.E "`invokeOnCompletion` return disposable composition").
    #[must_use]
    pub fn combine(self, other: Disposable) -> Disposable {
        Disposable::new(move || {
            self.dispose();
            other.dispose();
        })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("active", &self.is_active())
            .field("cancelled", &self.is_cancelled())
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl Job {
    /// Creates a new, not-yet-started job. `on_start` runs exactly once, the
    /// first time [`Job::start`] succeeds — it is how a builder defers
    /// actually dispatching the coroutine body until start is requested
    /// (`spec.md` §6 "lazy" start mode).
    pub fn new(
        parent: Option<Job>,
        name: Option<Arc<str>>,
        supervisor: bool,
        reports_uncaught: bool,
        exception_handler: Option<Arc<dyn ExceptionHandler>>,
        on_start: impl FnOnce() + Send + 'static,
    ) -> Job {
        let job = Job(Arc::new(JobInner {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            name,
            supervisor,
            reports_uncaught,
            parent: parent.clone(),
            exception_handler,
            state: Mutex::new(JobState::new()),
            next_id: AtomicU64::new(1),
            on_start: Mutex::new(Some(Box::new(on_start))),
        }));
        if let Some(parent) = parent {
            parent.attach_child(&job).dispose();
        }
        job
    }

    /// A job that is already started, for builders whose body begins running
    /// synchronously on construction (`spec.md` §6 "default"/"atomic" start
    /// modes never leave a job sitting unstarted).
    pub fn new_active(
        parent: Option<Job>,
        name: Option<Arc<str>>,
        supervisor: bool,
        reports_uncaught: bool,
        exception_handler: Option<Arc<dyn ExceptionHandler>>,
    ) -> Job {
        let job = Job::new(
            parent,
            name,
            supervisor,
            reports_uncaught,
            exception_handler,
            || {},
        );
        job.start();
        job
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn downgrade(&self) -> WeakJob {
        WeakJob(Arc::downgrade(&self.0))
    }

    fn next_id(&self) -> u64 {
        self.0.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// CAS `started = false -> true`; runs `on_start` once on success.
    /// `spec.md` §4.5 "start": a job constructed already active is a no-op.
    pub fn start(&self) -> bool {
        let became_active = {
            let mut guard = self.0.state.lock();
            match &mut *guard {
                JobState::Active(active) if !active.started => {
                    active.started = true;
                    true
                }
                _ => false,
            }
        };
        if became_active {
            if let Some(cb) = self.0.on_start.lock().take() {
                cb();
            }
        }
        became_active
    }

    pub fn is_active(&self) -> bool {
        matches!(&*self.0.state.lock(), JobState::Active(a) if a.started)
    }

    pub fn is_cancelled(&self) -> bool {
        match &*self.0.state.lock() {
            JobState::Finishing(f) => f.cancelling,
            JobState::Completed(outcome) => outcome.cause().is_some_and(JobCause::is_cancellation),
            JobState::Active(_) => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(&*self.0.state.lock(), JobState::Completed(_))
    }

    /// The terminal cause, if any: `None` for an active job or a successful
    /// completion.
    pub fn completion_cause(&self) -> Option<JobCause> {
        match &*self.0.state.lock() {
            JobState::Completed(outcome) => outcome.cause().cloned(),
            JobState::Finishing(f) => f.cause.clone(),
            JobState::Active(_) => None,
        }
    }

    /// Requests cancellation with the given cause (`spec.md` §4.5 `cancel`).
    /// Returns whether *this* call was the one that moved the job into
    /// `Finishing`/`Completed` — later callers merge in as suppressed causes.
    pub fn cancel(&self, cause: CancellationCause) -> bool {
        self.cancel_with(JobCause::Cancelled(cause))
    }

    /// Internal: cancellation driven either by an external `cancel()` call or
    /// by a non-supervised child's failure propagating upward.
    pub(crate) fn cancel_with(&self, cause: JobCause) -> bool {
        enum Action {
            None,
            FireCancellingHandlers(Vec<HandlerEntry>, Vec<ChildEntry>),
            CancelChildrenOnly(Vec<ChildEntry>),
            AlreadyCompleted,
        }

        let action = {
            let mut guard = self.0.state.lock();
            // Take the state by value rather than matching on a (mutable)
            // reference into `guard`: every arm below ends up writing a new
            // value back into `*guard`, and extracting an owned value first
            // keeps that write from ever overlapping a live borrow of the
            // old one.
            let previous = std::mem::replace(&mut *guard, JobState::new());
            match previous {
                JobState::Active(mut active) => {
                    let children = active.children.clone();
                    let all_handlers = std::mem::take(&mut active.handlers);
                    let (firing, keep): (Vec<_>, Vec<_>) =
                        all_handlers.into_iter().partition(|h| h.on_cancelling);
                    *guard = JobState::Finishing(FinishingState {
                        children: children.clone(),
                        handlers: keep,
                        cause: Some(cause.clone()),
                        cancelling: true,
                        proposed_success: None,
                    });
                    Action::FireCancellingHandlers(firing, children)
                }
                JobState::Finishing(mut f) if !f.cancelling => {
                    // Was completing normally, racing against a late
                    // cancel/failure: the cancel wins the race and becomes
                    // root cause; remaining children still need notifying.
                    f.cancelling = true;
                    f.cause = Some(cause.clone());
                    f.proposed_success = None;
                    let children = f.children.clone();
                    *guard = JobState::Finishing(f);
                    Action::CancelChildrenOnly(children)
                }
                JobState::Finishing(mut f) => {
                    merge_suppressed(&mut f, &cause);
                    *guard = JobState::Finishing(f);
                    Action::None
                }
                completed @ JobState::Completed(_) => {
                    *guard = completed;
                    Action::AlreadyCompleted
                }
            }
        };

        match action {
            Action::FireCancellingHandlers(handlers, children) => {
                for handler in &handlers {
                    (handler.handler)(Some(&cause));
                }
                for child in &children {
                    child.child.cancel_with(cause.clone());
                }
                self.try_finalize();
                true
            }
            Action::CancelChildrenOnly(children) => {
                for child in &children {
                    child.child.cancel_with(cause.clone());
                }
                self.try_finalize();
                true
            }
            Action::None | Action::AlreadyCompleted => false,
        }
    }

    /// Called by the dispatched-task driver when the job's own body future
    /// resolves successfully (`spec.md` §4.5 `complete`).
    pub(crate) fn complete_success(&self, value: Arc<dyn Any + Send + Sync>) {
        self.finish_body(None, Some(value));
    }

    /// Called by the driver when the job's own body future resolves with a
    /// user error.
    pub(crate) fn complete_failure(&self, error: AppError) {
        self.finish_body(Some(JobCause::Failed(error)), None);
    }

    fn finish_body(
        &self,
        failure: Option<JobCause>,
        success_value: Option<Arc<dyn Any + Send + Sync>>,
    ) {
        enum Action {
            Completed(Outcome, Vec<HandlerEntry>),
            EnteredFinishingNormally,
            Ignored,
        }

        let action = {
            let mut guard = self.0.state.lock();
            // As in `cancel_with`: take the current state by value so the
            // write-back below never overlaps a live borrow of the value it
            // replaces.
            let previous = std::mem::replace(&mut *guard, JobState::new());
            match previous {
                JobState::Active(mut active) => {
                    let children = active.children.clone();
                    let handlers = std::mem::take(&mut active.handlers);
                    if let Some(cause) = failure {
                        if children.is_empty() {
                            *guard = JobState::Completed(Outcome::Failed(cause.clone()));
                            Action::Completed(Outcome::Failed(cause), handlers)
                        } else {
                            let (firing, keep): (Vec<_>, Vec<_>) =
                                handlers.into_iter().partition(|h| h.on_cancelling);
                            *guard = JobState::Finishing(FinishingState {
                                children: children.clone(),
                                handlers: keep,
                                cause: Some(cause.clone()),
                                cancelling: true,
                                proposed_success: None,
                            });
                            drop(guard);
                            for h in &firing {
                                (h.handler)(Some(&cause));
                            }
                            return self.finish_body_propagate(children, cause);
                        }
                    } else {
                        let value =
                            success_value.unwrap_or_else(|| Arc::new(()) as Arc<dyn Any + Send + Sync>);
                        if children.is_empty() {
                            *guard = JobState::Completed(Outcome::Success(value.clone()));
                            Action::Completed(Outcome::Success(value), handlers)
                        } else {
                            *guard = JobState::Finishing(FinishingState {
                                children,
                                handlers,
                                cause: None,
                                cancelling: false,
                                proposed_success: Some(value),
                            });
                            Action::EnteredFinishingNormally
                        }
                    }
                }
                other => {
                    *guard = other;
                    Action::Ignored
                }
            }
        };

        match action {
            Action::Completed(outcome, handlers) => self.fire_completion(outcome, handlers),
            Action::EnteredFinishingNormally | Action::Ignored => {}
        }
    }

    fn finish_body_propagate(&self, children: Vec<ChildEntry>, cause: JobCause) {
        for child in &children {
            child.child.cancel_with(cause.clone());
        }
        self.try_finalize();
    }

    /// Once in `Finishing` with no remaining children, commits to `Completed`
    /// and fires the handlers that survived into the final phase.
    fn try_finalize(&self) {
        let ready = {
            let mut guard = self.0.state.lock();
            let children_empty = matches!(&*guard, JobState::Finishing(f) if f.children.is_empty());
            if !children_empty {
                None
            } else {
                let previous = std::mem::replace(
                    &mut *guard,
                    JobState::Completed(Outcome::Success(Arc::new(()))),
                );
                let JobState::Finishing(f) = previous else {
                    unreachable!("children_empty only true for JobState::Finishing")
                };
                let outcome = if let Some(cause) = f.cause {
                    Outcome::Failed(cause)
                } else if let Some(value) = f.proposed_success {
                    Outcome::Success(value)
                } else {
                    Outcome::Success(Arc::new(()))
                };
                *guard = JobState::Completed(outcome.clone());
                Some((outcome, f.handlers))
            }
        };
        if let Some((outcome, handlers)) = ready {
            self.fire_completion(outcome, handlers);
        }
    }

    fn fire_completion(&self, outcome: Outcome, handlers: Vec<HandlerEntry>) {
        let cause = outcome.cause().cloned();
        for handler in &handlers {
            (handler.handler)(cause.as_ref());
        }

        if let Some(JobCause::Failed(app_err)) = &cause {
            if self.0.reports_uncaught {
                let handler = self
                    .0
                    .exception_handler
                    .clone()
                    .unwrap_or_else(|| Arc::new(crate::error::DefaultExceptionHandler));
                handler.handle(self.name(), &JobCause::Failed(app_err.clone()));
            }
        }

        if let Some(parent) = &self.0.parent {
            let propagate = matches!(&cause, Some(JobCause::Failed(_))) && !parent.0.supervisor;
            if propagate {
                if let Some(JobCause::Failed(app_err)) = cause {
                    parent.cancel_with(JobCause::Failed(app_err));
                }
            }
        }
    }

    /// Registers a completion handler. `on_cancelling` handlers fire the
    /// instant the job starts cancelling; the rest fire only at the final
    /// `Completed` transition (`spec.md` §4.5 "Completion handler
    /// ordering"). A handler registered after the job is already terminal
    /// runs synchronously, once, immediately (`spec.md` §3.2 invariant).
    pub fn invoke_on_completion<F>(&self, on_cancelling: bool, handler: F) -> Disposable
    where
        F: Fn(Option<&JobCause>) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let immediate_cause = {
            let mut guard = self.0.state.lock();
            match &mut *guard {
                JobState::Active(active) => {
                    active.handlers.push(HandlerEntry {
                        id,
                        on_cancelling,
                        handler: Box::new(handler),
                    });
                    return self.handler_disposable(id);
                }
                JobState::Finishing(f) if !(on_cancelling && f.cancelling) => {
                    f.handlers.push(HandlerEntry {
                        id,
                        on_cancelling,
                        handler: Box::new(handler),
                    });
                    return self.handler_disposable(id);
                }
                JobState::Finishing(f) => Some(f.cause.clone()),
                JobState::Completed(outcome) => Some(outcome.cause().cloned()),
            }
        };
        if let Some(cause) = immediate_cause {
            handler(cause.as_ref());
        }
        Disposable::noop()
    }

    fn handler_disposable(&self, id: u64) -> Disposable {
        let weak = self.downgrade();
        Disposable::new(move || {
            if let Some(job) = weak.upgrade() {
                job.remove_handler(id);
            }
        })
    }

    fn remove_handler(&self, id: u64) {
        let mut guard = self.0.state.lock();
        match &mut *guard {
            JobState::Active(a) => a.handlers.retain(|h| h.id != id),
            JobState::Finishing(f) => f.handlers.retain(|h| h.id != id),
            JobState::Completed(_) => {}
        }
    }

    /// Attaches `child` to `self` as a structured-concurrency child
    /// (`spec.md` §3.3, §4.5 `attach_child`). If `self` is already
    /// finishing, `child` is cancelled immediately with `self`'s cause and a
    /// no-op handle is returned.
    pub fn attach_child(&self, child: &Job) -> Disposable {
        let child_id = child.0.id;
        let immediate_cause = {
            let mut guard = self.0.state.lock();
            match &mut *guard {
                JobState::Active(active) => {
                    active.children.push(ChildEntry {
                        id: child_id,
                        child: child.clone(),
                    });
                    None
                }
                JobState::Finishing(f) => Some(f.cause.clone().unwrap_or_else(|| {
                    JobCause::Cancelled(CancellationCause::new("parent scope is completing"))
                })),
                JobState::Completed(outcome) => Some(outcome.cause().cloned().unwrap_or_else(|| {
                    JobCause::Cancelled(CancellationCause::new("parent scope already completed"))
                })),
            }
        };
        if let Some(cause) = immediate_cause {
            child.cancel_with(cause);
            return Disposable::noop();
        }

        let parent_weak = self.downgrade();
        child.invoke_on_completion(false, move |_cause| {
            if let Some(parent) = parent_weak.upgrade() {
                parent.on_child_finished(child_id);
            }
        })
    }

    /// Drops `child_id` from the children bookkeeping once it has completed.
    /// Cancelling the parent when the child *failed* is handled separately,
    /// directly off the stored `parent` link in [`Job::fire_completion`] —
    /// not here, so a failure only ever cancels its parent once.
    fn on_child_finished(&self, child_id: u64) {
        let should_finalize = {
            let mut guard = self.0.state.lock();
            match &mut *guard {
                JobState::Active(a) => {
                    a.children.retain(|c| c.id != child_id);
                    false
                }
                JobState::Finishing(f) => {
                    f.children.retain(|c| c.id != child_id);
                    f.children.is_empty()
                }
                JobState::Completed(_) => false,
            }
        };
        if should_finalize {
            self.try_finalize();
        }
    }

    /// Suspends until terminal, without throwing the cause — callers check
    /// [`Job::is_cancelled`] separately (`spec.md` §4.5 `join`). A no-op
    /// `start()` call first: a lazily-started job (`spec.md` §6 "lazy") only
    /// ever gets its body dispatched by an explicit `start()` or by the
    /// first `join`/`await`, and this is a no-op for an already-started job.
    pub async fn join(&self) {
        self.start();
        JobJoinFuture { job: self.clone() }.await
    }
}

fn merge_suppressed(finishing: &mut FinishingState, new_cause: &JobCause) {
    if let (Some(JobCause::Failed(root)), JobCause::Failed(extra)) =
        (&finishing.cause, new_cause)
    {
        finishing.cause = Some(JobCause::Failed(root.with_suppressed(extra.clone())));
    }
    // A second cancellation arriving after the first is recorded as a no-op:
    // the first root cause (cancellation or failure) always wins.
}

struct JobJoinFuture {
    job: Job,
}

impl std::future::Future for JobJoinFuture {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<()> {
        if self.job.is_completed() {
            return std::task::Poll::Ready(());
        }
        let waker = cx.waker().clone();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_for_handler = fired.clone();
        let disposable = self.job.invoke_on_completion(false, move |_cause| {
            if !fired_for_handler.swap(true, Ordering::SeqCst) {
                waker.wake_by_ref();
            }
        });
        // Re-check: the handler may have fired synchronously if the job
        // completed between our first check and registration.
        if self.job.is_completed() {
            disposable.dispose();
            return std::task::Poll::Ready(());
        }
        std::mem::forget(disposable);
        std::task::Poll::Pending
    }
}
