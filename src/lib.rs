#![allow(clippy::result_large_err)]
#![doc = "weft-core: a structured-concurrency runtime core — jobs, cancellable"]
#![doc = "continuations, pluggable dispatchers, channels and the synchronization"]
#![doc = "primitives built on top of them."]
#![doc = ""]
#![doc = "== Scope =="]
#![doc = "This crate is the runtime *core*: job lifecycle, suspension, dispatch and"]
#![doc = "the channel/semaphore/select/flow primitives built from it. It does not"]
#![doc = "include wire codecs, transports, or cluster membership — those are"]
#![doc = "external collaborators layered on top, not part of this crate."]
#![doc = ""]
#![doc = "== Compatibility =="]
#![doc = "This crate targets `std`: real OS-thread dispatchers and timers need it."]
#![doc = "There is currently no allocator-free or `no_std` mode."]

pub use async_trait::async_trait;

pub mod builders;
pub mod channel;
pub mod context;
pub mod continuation;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod future;
pub mod job;
pub mod select;
pub mod sync;
pub mod testing;
pub mod time;

pub use builders::{
    async_with_start, coroutine_scope, launch, launch_with_start, r#async, supervisor_scope,
    with_context, yield_now, Deferred, Start,
};
pub use context::{CoroutineName, ExecutionContext};
pub use continuation::{CancellableContinuation, ResumeHandle, Resumption};
pub use dispatcher::{Dispatcher, DynDispatcher, ThreadPoolDispatcher, UnconfinedDispatcher};
pub use error::{
    AppError, CancellationCause, CancellationException, ClosedReceiveChannelException,
    ClosedSendChannelException, DefaultExceptionHandler, ExceptionHandler, JobCause, SharedError,
    TimeoutCancellationException, TimeoutToken,
};
pub use job::{Disposable, Job, WeakJob};
pub use select::{select, select2, Either};
pub use sync::{Mutex, MutexError, MutexGuard, Semaphore, SemaphorePermit};
pub use time::{await_cancellation, delay, with_timeout, DelaySource, SystemDelaySource};

use std::sync::{Arc, OnceLock};

static DEFAULT_DISPATCHER: OnceLock<DynDispatcher> = OnceLock::new();

/// The dispatcher a builder falls back to when a context carries none: a
/// small fixed thread pool, sized to the available parallelism the way the
/// teacher's own runtime defaults its worker count.
pub fn default_dispatcher() -> DynDispatcher {
    DEFAULT_DISPATCHER
        .get_or_init(|| {
            let workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            Arc::new(ThreadPoolDispatcher::new("weft-worker", workers)) as DynDispatcher
        })
        .clone()
}

/// Builds a fresh root [`ExecutionContext`] carrying a new top-level job, the
/// default dispatcher, and the default exception handler — the context a
/// host application starts from (`spec.md` §3.1).
pub fn root_context() -> ExecutionContext {
    let job = Job::new_active(None, None, false, true, None);
    ExecutionContext::empty()
        .with_job(job)
        .with_dispatcher(default_dispatcher())
}
