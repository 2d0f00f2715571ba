//! Coroutine builders: the public entry points that actually create jobs and
//! dispatch bodies onto a [`Dispatcher`] (`spec.md` §4 overview, §6 external
//! interfaces).

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::task::{Context as TaskContext, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::dispatcher::{Dispatcher, DynDispatcher};
use crate::error::{AppError, JobCause};
use crate::future::{block_on, BoxFuture};
use crate::job::Job;

/// A builder's `start` parameter (`spec.md` §6): when a launched/`async`
/// job's body actually begins running relative to the call that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Start {
    /// Schedules the body onto the dispatcher immediately. If the job is
    /// cancelled before the dispatcher actually gets to it, the body never
    /// runs at all.
    Default,
    /// Creates the job but does not schedule its body until [`Job::start`]
    /// is called, or the job is joined/awaited — `spec.md` §6 "lazy".
    Lazy,
    /// Schedules the body immediately, like `Default`, but guarantees it
    /// begins running even if the job is cancelled in the window between
    /// scheduling and the dispatcher picking it up — `spec.md` §6 "atomic".
    Atomic,
    /// Runs the body inline on the calling thread up to its first
    /// suspension; only the remainder after that first suspend point is
    /// handed to the dispatcher — `spec.md` §6 "undispatched".
    Undispatched,
}

/// Runs `fut` inline on the calling thread up to its first suspension, then
/// hands the remainder to `dispatcher` — the driver behind [`Start::Undispatched`].
///
/// The handoff has to survive a race between "the first poll returns
/// `Pending`" and "the waker fires before that poll returns" (e.g. the
/// suspend point resolves synchronously on another thread): the shared
/// [`Handoff`] cell records whichever happens first and the loser performs
/// the dispatch, the same two-outcomes-one-cell shape
/// [`crate::continuation::CancellableContinuation`] uses for its decision.
fn drive_undispatched<T: Send + 'static>(
    dispatcher: DynDispatcher,
    mut fut: BoxFuture<'static, T>,
    on_complete: impl FnOnce(T) + Send + 'static,
) {
    enum Handoff<T> {
        Polling,
        WokenWhilePolling,
        Parked(BoxFuture<'static, T>, Box<dyn FnOnce(T) + Send>),
    }

    struct ResumeWaker<T> {
        dispatcher: DynDispatcher,
        handoff: Mutex<Handoff<T>>,
    }

    impl<T: Send + 'static> ResumeWaker<T> {
        fn fire(self: &Arc<Self>) {
            let mut guard = self.handoff.lock();
            match std::mem::replace(&mut *guard, Handoff::Polling) {
                Handoff::Polling => *guard = Handoff::WokenWhilePolling,
                Handoff::WokenWhilePolling => *guard = Handoff::WokenWhilePolling,
                Handoff::Parked(fut, on_complete) => {
                    drop(guard);
                    let dispatcher = self.dispatcher.clone();
                    dispatcher.dispatch(Box::new(move || on_complete(block_on(fut))));
                }
            }
        }
    }

    impl<T: Send + 'static> Wake for ResumeWaker<T> {
        fn wake(self: Arc<Self>) {
            self.fire();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.fire();
        }
    }

    let resume = Arc::new(ResumeWaker {
        dispatcher: dispatcher.clone(),
        handoff: Mutex::new(Handoff::Polling),
    });
    let waker = Waker::from(resume.clone());
    let mut cx = TaskContext::from_waker(&waker);

    match fut.as_mut().poll(&mut cx) {
        Poll::Ready(value) => on_complete(value),
        Poll::Pending => {
            let mut guard = resume.handoff.lock();
            match std::mem::replace(&mut *guard, Handoff::Polling) {
                Handoff::Polling => *guard = Handoff::Parked(fut, Box::new(on_complete)),
                Handoff::WokenWhilePolling => {
                    drop(guard);
                    dispatcher.dispatch(Box::new(move || on_complete(block_on(fut))));
                }
                Handoff::Parked(..) => unreachable!("nothing else installs a Parked handoff yet"),
            }
        }
    }
}

/// Creates a job under `start` and arranges for `body` to eventually run on
/// `dispatcher`, delivering its result through `on_result` as well as to the
/// job's own completion. Shared by [`launch_with_start`] and
/// [`async_with_start`] — the only thing they differ on is what `on_result`
/// does with a successful value (nothing, versus filling a [`Deferred`]'s
/// slot).
fn start_job<Fut, T>(
    parent: Option<Job>,
    name: Option<Arc<str>>,
    supervisor: bool,
    reports_uncaught: bool,
    handler: Option<Arc<dyn crate::error::ExceptionHandler>>,
    dispatcher: DynDispatcher,
    start: Start,
    body: impl FnOnce(Job) -> Fut + Send + 'static,
    on_result: impl FnOnce(Result<T, AppError>) + Send + 'static,
) -> Job
where
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + 'static,
{
    fn complete<T>(job: &Job, result: &Result<T, AppError>) {
        match result {
            Ok(_) => job.complete_success(Arc::new(())),
            Err(err) => job.complete_failure(err.clone()),
        }
    }

    match start {
        Start::Lazy => {
            let job_cell: Arc<OnceLock<Job>> = Arc::new(OnceLock::new());
            let job_cell_for_start = job_cell.clone();
            let job = Job::new(parent, name, supervisor, reports_uncaught, handler, move || {
                let job = job_cell_for_start
                    .get()
                    .expect("on_start fired before the job cell was populated")
                    .clone();
                let fut: BoxFuture<'static, Result<T, AppError>> = Box::pin(body(job.clone()));
                dispatcher.dispatch(Box::new(move || {
                    let result = block_on(fut);
                    complete(&job, &result);
                    on_result(result);
                }));
            });
            job_cell.set(job.clone()).ok();
            job
        }
        Start::Default | Start::Atomic => {
            let job = Job::new_active(parent, name, supervisor, reports_uncaught, handler);
            let job_for_driver = job.clone();
            let fut: BoxFuture<'static, Result<T, AppError>> = Box::pin(body(job.clone()));
            let skip_if_cancelled = start == Start::Default;
            dispatcher.dispatch(Box::new(move || {
                if skip_if_cancelled && job_for_driver.is_cancelled() {
                    return;
                }
                let result = block_on(fut);
                complete(&job_for_driver, &result);
                on_result(result);
            }));
            job
        }
        Start::Undispatched => {
            let job = Job::new_active(parent, name, supervisor, reports_uncaught, handler);
            let job_for_driver = job.clone();
            let fut: BoxFuture<'static, Result<T, AppError>> = Box::pin(body(job.clone()));
            drive_undispatched(dispatcher, fut, move |result| {
                complete(&job_for_driver, &result);
                on_result(result);
            });
            job
        }
    }
}

/// Launches `body` as a fire-and-forget child job of `context`'s job
/// (`spec.md` §6 `launch`). A failure returned by `body` is reported to the
/// context's exception handler and propagated to the parent — nobody is
/// expected to retrieve it via `await`, matching kotlinx's `launch`
/// (`reports_uncaught = true`).
pub fn launch<Fut>(context: &ExecutionContext, body: impl FnOnce(Job) -> Fut + Send + 'static) -> Job
where
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    launch_with_start(context, Start::Default, body)
}

/// Like [`launch`], but with an explicit `spec.md` §6 `start` mode instead
/// of always defaulting.
pub fn launch_with_start<Fut>(
    context: &ExecutionContext,
    start: Start,
    body: impl FnOnce(Job) -> Fut + Send + 'static,
) -> Job
where
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    let parent = context.job();
    let dispatcher = context.dispatcher().unwrap_or_else(crate::default_dispatcher);
    let handler = context.exception_handler();
    let name = context.name().map(|n| Arc::<str>::from(n.as_str()));

    start_job(parent, name, false, true, handler, dispatcher, start, body, |_| {})
}

/// A handle to an `async`-style job, whose result is retrieved with
/// [`Deferred::await_result`] rather than reported unprompted (`spec.md` §6
/// `async`, `reports_uncaught = false`).
pub struct Deferred<T> {
    job: Job,
    slot: Arc<OnceLock<Result<T, AppError>>>,
}

impl<T: Send + Sync + Clone + 'static> Deferred<T> {
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Waits for the job to finish and returns its value, or the job's
    /// terminal cause — failure or cancellation (`spec.md` §4.5 `await`, as
    /// distinct from `join` which never throws).
    pub async fn await_result(&self) -> Result<T, JobCause> {
        self.job.join().await;
        match self.job.completion_cause() {
            Some(cause) => Err(cause),
            None => Ok(self
                .slot
                .get()
                .expect("job completed successfully but its result slot was never filled")
                .clone()
                .expect("result slot holds a failure despite a successful completion cause")),
        }
    }
}

/// Starts `body` as a job whose result is collected with
/// [`Deferred::await_result`] instead of being reported to the exception
/// handler on failure (`spec.md` §6 `async`).
pub fn r#async<Fut, T>(
    context: &ExecutionContext,
    body: impl FnOnce(Job) -> Fut + Send + 'static,
) -> Deferred<T>
where
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + Sync + 'static,
{
    async_with_start(context, Start::Default, body)
}

/// Like [`r#async`], but with an explicit `spec.md` §6 `start` mode instead
/// of always defaulting.
pub fn async_with_start<Fut, T>(
    context: &ExecutionContext,
    start: Start,
    body: impl FnOnce(Job) -> Fut + Send + 'static,
) -> Deferred<T>
where
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    T: Send + Sync + 'static,
{
    let parent = context.job();
    let dispatcher = context.dispatcher().unwrap_or_else(crate::default_dispatcher);
    let name = context.name().map(|n| Arc::<str>::from(n.as_str()));

    let slot: Arc<OnceLock<Result<T, AppError>>> = Arc::new(OnceLock::new());
    let slot_for_driver = slot.clone();
    let job = start_job(parent, name, false, false, None, dispatcher, start, body, move |result| {
        let _ = slot_for_driver.set(result);
    });

    Deferred { job, slot }
}

/// Returns a context identical to `context` but with `dispatcher` installed,
/// for code that wants to run a block under a specific dispatcher without
/// spawning a new job (`spec.md` §6 `withContext`). This crate has no
/// implicit "current context" thread-local, so callers thread the returned
/// context through explicitly; `with_context` mainly exists so builder call
/// sites read the same as the rest of this API.
pub fn with_context(context: &ExecutionContext, dispatcher: DynDispatcher) -> ExecutionContext {
    context.with_dispatcher(dispatcher)
}

/// Yields to other work already queued on the context's dispatcher before
/// resuming (`spec.md` §4.2 "yield").
pub async fn yield_now(context: &ExecutionContext) {
    let dispatcher = context.dispatcher().unwrap_or_else(crate::default_dispatcher);
    YieldNow {
        dispatcher,
        yielded: false,
    }
    .await
}

struct YieldNow {
    dispatcher: DynDispatcher,
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            return std::task::Poll::Ready(());
        }
        this.yielded = true;
        let waker = cx.waker().clone();
        this.dispatcher
            .yield_dispatch(Box::new(move || waker.wake()));
        std::task::Poll::Pending
    }
}

/// Runs `body` with a fresh child job and waits for all of its own children
/// before returning — a structured-concurrency scope (`spec.md` §6
/// `coroutineScope`). A child failure cancels the scope and its siblings;
/// the failure is rethrown to the caller.
pub async fn coroutine_scope<Fut, T>(
    context: &ExecutionContext,
    body: impl FnOnce(ExecutionContext) -> Fut,
) -> Result<T, JobCause>
where
    Fut: Future<Output = T>,
{
    scope_impl(context, false, body).await
}

/// Like [`coroutine_scope`], but a failing child is isolated rather than
/// cancelling its siblings or the scope itself (`spec.md` §4.5 "supervisor",
/// §8 scenario 6).
pub async fn supervisor_scope<Fut, T>(
    context: &ExecutionContext,
    body: impl FnOnce(ExecutionContext) -> Fut,
) -> Result<T, JobCause>
where
    Fut: Future<Output = T>,
{
    scope_impl(context, true, body).await
}

async fn scope_impl<Fut, T>(
    context: &ExecutionContext,
    supervisor: bool,
    body: impl FnOnce(ExecutionContext) -> Fut,
) -> Result<T, JobCause>
where
    Fut: Future<Output = T>,
{
    let parent = context.job();
    let handler = context.exception_handler();
    let scope_job = Job::new_active(parent, None, supervisor, false, handler);
    let scope_context = context.with_job(scope_job.clone());

    let value = body(scope_context).await;

    // The scope's own "body" is this async fn, not a dispatched job driver,
    // so nothing else ever calls `complete_success` on `scope_job` — without
    // this, a scope with no failing children would sit `Active` forever and
    // `join` below would never return. A no-op if a child failure already
    // cancelled it.
    scope_job.complete_success(Arc::new(()));

    scope_job.join().await;
    match scope_job.completion_cause() {
        Some(cause) => Err(cause),
        None => Ok(value),
    }
}

pub use crate::time::{await_cancellation, delay, with_timeout};
