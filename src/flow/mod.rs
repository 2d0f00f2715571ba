//! A minimal cold `Flow` (`spec.md` §4.10).
//!
//! A [`Flow`] does nothing until collected: calling [`Flow::collect`] runs
//! the flow's body, which pushes values into the supplied [`Collector`] one
//! at a time, suspending between each the way a channel send would. This
//! mirrors kotlinx's cold-flow contract — no buffering, no sharing, a fresh
//! run per collector — and is the one place in the crate that reaches for
//! `async_trait`, since `Flow`/`Collector` need to be object-safe (stored
//! behind `Box<dyn Flow<Item = T>>`) and async fns in traits are not yet
//! object-safe on their own.

use async_trait::async_trait;
use std::sync::Arc;

use crate::channel::{self, Capacity, Overflow, RecvError, SendError};
use crate::future::BoxFuture;
use crate::job::Job;

/// Receives values emitted by a [`Flow`]. `spec.md` §4.10 "emitter". `job`
/// is the emitting call's own job, threaded through the same way every
/// other suspend point in this crate takes one — it is what lets a
/// [`SafeCollector`] check `emit` ran in the same job `collect` did.
#[async_trait]
pub trait Collector<T: Send>: Send {
    async fn emit(&mut self, value: T, job: Option<&Job>) -> Result<(), SendError>;
}

/// A cold asynchronous sequence: inert until [`Flow::collect`] runs it.
#[async_trait]
pub trait Flow<T: Send>: Send + Sync {
    async fn collect(&self, collector: &mut dyn Collector<T>, job: Option<&Job>) -> Result<(), SendError>;
}

/// Wraps a plain closure as a [`Collector`], the common case of "do
/// something with each value".
pub struct FnCollector<F>(pub F);

#[async_trait]
impl<T, F> Collector<T> for FnCollector<F>
where
    T: Send + 'static,
    F: FnMut(T) + Send,
{
    async fn emit(&mut self, value: T, _job: Option<&Job>) -> Result<(), SendError> {
        (self.0)(value);
        Ok(())
    }
}

/// A *safe collector* (`spec.md` §4.10): wraps another [`Collector`] and
/// rejects an `emit` whose job doesn't match the job [`Flow::collect`] was
/// invoked with. [`FlowBuilder::collect`] always hands its body one of
/// these rather than the caller's collector directly, so a body that emits
/// from a different job — e.g. one that spawns a child task and emits from
/// it instead of forwarding the job it was given — breaks the cold-flow
/// context-preservation contract loudly instead of silently.
struct SafeCollector<'a, T> {
    inner: &'a mut dyn Collector<T>,
    expected_job_id: Option<u64>,
}

#[async_trait]
impl<'a, T: Send> Collector<T> for SafeCollector<'a, T> {
    async fn emit(&mut self, value: T, job: Option<&Job>) -> Result<(), SendError> {
        let actual_job_id = job.map(Job::id);
        assert_eq!(
            actual_job_id, self.expected_job_id,
            "flow collector context violation: emit() was called from a different job than collect() was invoked with"
        );
        self.inner.emit(value, job).await
    }
}

/// Builds a [`Flow`] from an async closure that emits through the collector
/// it is handed, the same shape as kotlinx's `flow { ... }` builder.
///
/// The closure must return a boxed future (`Box::pin(async move { ... })`)
/// rather than a bare `async` block's opaque type, since the future it
/// returns borrows the collector reference handed to it on that particular
/// call — the same `BoxFuture` convention [`channel_flow`]'s body uses.
pub struct FlowBuilder<F> {
    body: F,
}

pub fn flow<F, T>(body: F) -> FlowBuilder<F>
where
    F: for<'c> Fn(&'c mut dyn Collector<T>, Option<&'c Job>) -> BoxFuture<'c, Result<(), SendError>> + Send + Sync,
    T: Send,
{
    FlowBuilder { body }
}

#[async_trait]
impl<F, T> Flow<T> for FlowBuilder<F>
where
    F: for<'c> Fn(&'c mut dyn Collector<T>, Option<&'c Job>) -> BoxFuture<'c, Result<(), SendError>> + Send + Sync,
    T: Send + 'static,
{
    async fn collect(&self, collector: &mut dyn Collector<T>, job: Option<&Job>) -> Result<(), SendError> {
        let mut safe = SafeCollector {
            inner: collector,
            expected_job_id: job.map(Job::id),
        };
        (self.body)(&mut safe, job).await
    }
}

/// Turns a cold [`Flow`] into a channel the caller can receive from freely —
/// `spec.md` §4.10 "channelFlow"-equivalent: the flow body runs as a
/// separate job feeding a rendezvous channel, rather than running inline on
/// the collecting side.
pub fn channel_flow<T: Send + 'static>(
    capacity: Capacity,
    body: impl FnOnce(channel::Sender<T>) -> crate::future::BoxFuture<'static, Result<(), SendError>>
        + Send
        + 'static,
) -> (ChannelFlowHandle, channel::Receiver<T>) {
    let (tx, rx) = channel::channel(capacity, Overflow::SuspendSender);
    let job = Job::new_active(None, Some(Arc::from("channelFlow")), false, true, None);
    let job_for_body = job.clone();
    std::thread::Builder::new()
        .name("channel-flow".into())
        .spawn(move || {
            let result = crate::future::block_on(body(tx));
            match result {
                Ok(()) => job_for_body.complete_success(Arc::new(())),
                Err(err) => job_for_body.complete_failure(crate::error::AppError::new(FlowBodyError(err))),
            }
        })
        .expect("failed to spawn channel-flow driver thread");
    (ChannelFlowHandle { job }, rx)
}

#[derive(Debug, thiserror::Error)]
#[error("flow body error: {0}")]
struct FlowBodyError(SendError);

/// A handle to the background job driving a [`channel_flow`]; cancelling it
/// stops the flow body at its next suspend point.
pub struct ChannelFlowHandle {
    job: Job,
}

impl ChannelFlowHandle {
    pub fn job(&self) -> &Job {
        &self.job
    }
}

/// Catches a `Collector` or `Flow` that observed a `RecvError` and turns it
/// into the matching send-side close, so a channel-backed flow's consumer
/// cancelling its receive propagates back to the producer's next emit.
pub fn recv_to_send_error(err: RecvError) -> SendError {
    match err {
        RecvError::Closed(closed) => SendError::Closed(crate::error::ClosedSendChannelException {
            cause: closed.cause,
        }),
        RecvError::Cancelled(cause) => SendError::Cancelled(cause),
    }
}
