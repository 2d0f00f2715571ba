//! Channels (`spec.md` §4.9).
//!
//! A [`Channel`] is a hand-off point between suspended senders and
//! receivers: whichever side arrives second completes immediately against
//! the side that is already waiting, and whichever side arrives first
//! suspends (subject to [`buffer::Capacity`]/[`buffer::Overflow`]). `Sender`
//! and `Receiver` are cheap `Clone` handles sharing one [`Inner`]; the
//! channel closes once every `Sender` is dropped, or explicitly via
//! [`Sender::close`].

mod buffer;
mod segment;

pub use buffer::{Capacity, Overflow};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::continuation::{CancellableContinuation, Resumption};
use crate::error::{
    AppError, CancellationCause, ClosedReceiveChannelException, ClosedSendChannelException, JobCause,
};
use crate::job::Job;
use segment::SegmentQueue;

/// Wraps a channel `cancel(cause)`'s [`CancellationCause`] as the `AppError`
/// carried by the `Closed*ChannelException`s pending/future sends and
/// receives observe after the cancellation (`spec.md` §3.6, §4.9 `cancel`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("channel was cancelled: {0}")]
struct ChannelCancelledCause(CancellationCause);

/// The outcome of an `.await`ed [`Channel::send`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Closed(#[from] ClosedSendChannelException),
    #[error("send was cancelled: {0}")]
    Cancelled(JobCause),
    /// Only returned by [`Sender::try_send`] under
    /// [`Overflow::SuspendSender`]: there was no room and no waiting
    /// receiver, and `try_send` does not suspend. The value is dropped.
    #[error("channel is full")]
    Full,
}

/// The outcome of an `.await`ed [`Channel::receive`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecvError {
    #[error(transparent)]
    Closed(#[from] ClosedReceiveChannelException),
    #[error("receive was cancelled: {0}")]
    Cancelled(JobCause),
}

type SendResume = Result<(), ClosedSendChannelException>;
type RecvResume<T> = Result<T, ClosedReceiveChannelException>;

struct SendWaiter<T> {
    value: Mutex<Option<T>>,
    resume: crate::continuation::ResumeHandle<SendResume>,
}

/// A value the channel evicted or discarded without ever handing it to a
/// receiver — buffer overflow under [`Overflow::DropOldest`]/[`Overflow::DropLatest`],
/// or a value reclaimed from a sender whose suspension was cancelled
/// (`spec.md` §4.9 "cancellation during delivery", §7 "Resource policy").
pub type UndeliveredElementHandler<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Inner<T> {
    buffer: Mutex<std::collections::VecDeque<T>>,
    capacity: Capacity,
    overflow: Overflow,
    closed: AtomicBool,
    close_cause: Mutex<Option<AppError>>,
    receive_waiters: SegmentQueue<crate::continuation::ResumeHandle<RecvResume<T>>>,
    send_waiters: SegmentQueue<Arc<SendWaiter<T>>>,
    senders_alive: std::sync::atomic::AtomicUsize,
    on_undelivered: Option<UndeliveredElementHandler<T>>,
}

/// Creates a channel with the given capacity/overflow policy and its first
/// `Sender`/`Receiver` pair.
pub fn channel<T: Send + Unpin + 'static>(capacity: Capacity, overflow: Overflow) -> (Sender<T>, Receiver<T>) {
    channel_impl(capacity, overflow, None)
}

/// Like [`channel`], but `on_undelivered` runs (in the evicting caller's own
/// context, never deferred to another thread) for every value the channel
/// drops without delivery: an `Overflow::DropOldest` eviction, an
/// `Overflow::DropLatest` discard, or a value reclaimed from a send that was
/// cancelled before a receiver took it.
pub fn channel_with_undelivered_handler<T: Send + Unpin + 'static>(
    capacity: Capacity,
    overflow: Overflow,
    on_undelivered: impl Fn(T) + Send + Sync + 'static,
) -> (Sender<T>, Receiver<T>) {
    channel_impl(capacity, overflow, Some(Arc::new(on_undelivered)))
}

fn channel_impl<T: Send + Unpin + 'static>(
    capacity: Capacity,
    overflow: Overflow,
    on_undelivered: Option<UndeliveredElementHandler<T>>,
) -> (Sender<T>, Receiver<T>) {
    let overflow = match capacity {
        Capacity::Conflated => Overflow::DropOldest,
        _ => overflow,
    };
    let inner = Arc::new(Inner {
        buffer: Mutex::new(std::collections::VecDeque::new()),
        capacity,
        overflow,
        closed: AtomicBool::new(false),
        close_cause: Mutex::new(None),
        receive_waiters: SegmentQueue::new(),
        send_waiters: SegmentQueue::new(),
        senders_alive: std::sync::atomic::AtomicUsize::new(1),
        on_undelivered,
    });
    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}

pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.inner.senders_alive.fetch_add(1, Ordering::AcqRel);
        Sender {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.inner.senders_alive.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.close(None);
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver {
            inner: self.inner.clone(),
        }
    }
}

enum TrySendOutcome<T> {
    Sent,
    Full(T),
    Closed(T),
}

impl<T: Send + Unpin + 'static> Inner<T> {
    fn close(&self, cause: Option<AppError>) {
        self.close_internal(cause, false);
    }

    /// `spec.md` §4.9 `cancel(cause)`: closes **and** drains the buffer
    /// (routing every dropped value through the undelivered-element
    /// callback), failing all pending and future sends/receives — strictly
    /// stronger than [`Inner::close`], which leaves buffered values
    /// receivable.
    fn cancel(&self, cause: CancellationCause) {
        self.close_internal(Some(AppError::new(ChannelCancelledCause(cause))), true);
    }

    fn close_internal(&self, cause: Option<AppError>, drain_buffer: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.close_cause.lock() = cause;
        if drain_buffer {
            let drained: Vec<T> = self.buffer.lock().drain(..).collect();
            for value in drained {
                self.report_undelivered(value);
            }
        }
        for waiter in self.receive_waiters.drain() {
            let _ = waiter.try_resume(Err(ClosedReceiveChannelException {
                cause: self.close_cause.lock().clone(),
            }));
        }
        for waiter in self.send_waiters.drain() {
            if drain_buffer {
                if let Some(value) = waiter.value.lock().take() {
                    self.report_undelivered(value);
                }
            }
            let _ = waiter.resume.try_resume(Err(ClosedSendChannelException {
                cause: self.close_cause.lock().clone(),
            }));
        }
    }

    fn capacity_slots(&self) -> Option<usize> {
        self.capacity.slot_count()
    }

    fn try_send_locked(&self, value: T) -> TrySendOutcome<T> {
        if self.closed.load(Ordering::Acquire) {
            return TrySendOutcome::Closed(value);
        }
        // Direct handoff to a waiting receiver first. A waiter that lost a
        // race with its own cancellation hands the value straight back so
        // we can try the next one.
        let mut value = value;
        while let Some(waiter) = self.receive_waiters.pop_front() {
            match waiter.try_resume(Ok(value)) {
                Ok(()) => return TrySendOutcome::Sent,
                Err(Ok(returned)) => {
                    value = returned;
                    continue;
                }
                Err(Err(_)) => unreachable!("we only ever resume with Ok(value)"),
            }
        }
        TrySendOutcome::Full(value)
    }

    /// Buffers `value`, applying the overflow policy if full. Returns
    /// `Some(value)` if the caller must suspend instead (only reachable for
    /// `Overflow::SuspendSender`).
    fn buffer_or_overflow(&self, value: T) -> Option<T> {
        let mut buffer = self.buffer.lock();
        let full = self.capacity_slots().is_some_and(|n| buffer.len() >= n);
        if !full {
            buffer.push_back(value);
            return None;
        }
        match self.overflow {
            Overflow::SuspendSender => Some(value),
            Overflow::DropLatest => {
                drop(buffer);
                self.report_undelivered(value);
                None
            }
            Overflow::DropOldest => {
                let evicted = buffer.pop_front();
                buffer.push_back(value);
                drop(buffer);
                if let Some(evicted) = evicted {
                    self.report_undelivered(evicted);
                }
                None
            }
        }
    }

    fn report_undelivered(&self, value: T) {
        if let Some(handler) = &self.on_undelivered {
            handler(value);
        }
    }
}

impl<T: Send + Unpin + 'static> Sender<T> {
    /// Non-suspending best-effort send (`spec.md` §4.9 `try_send`): fails
    /// immediately rather than waiting for space.
    pub fn try_send(&self, value: T) -> Result<(), SendError> {
        match self.inner.try_send_locked(value) {
            TrySendOutcome::Sent => Ok(()),
            TrySendOutcome::Closed(_) => Err(SendError::Closed(ClosedSendChannelException {
                cause: self.inner.close_cause.lock().clone(),
            })),
            TrySendOutcome::Full(value) => match self.inner.buffer_or_overflow(value) {
                None => Ok(()),
                Some(_unsent) => Err(SendError::Full),
            },
        }
    }

    /// Suspends until the value is accepted: by a waiting receiver, by
    /// buffer space, by an overflow policy, or by the channel closing
    /// (`spec.md` §4.9 `send`). `job` links the suspension to cancellation.
    pub async fn send(&self, value: T, job: Option<&Job>) -> Result<(), SendError> {
        let value = match self.inner.try_send_locked(value) {
            TrySendOutcome::Sent => return Ok(()),
            TrySendOutcome::Closed(_) => {
                return Err(SendError::Closed(ClosedSendChannelException {
                    cause: self.inner.close_cause.lock().clone(),
                }))
            }
            TrySendOutcome::Full(value) => value,
        };

        let value = match self.inner.buffer_or_overflow(value) {
            None => return Ok(()),
            Some(value) => value,
        };

        let (mut cont, resume) = CancellableContinuation::new(job);
        let waiter = Arc::new(SendWaiter {
            value: Mutex::new(Some(value)),
            resume,
        });
        let waiter_for_cancel = waiter.clone();
        let inner_for_cancel = self.inner.clone();
        cont.invoke_on_cancellation(move |_cause| {
            if let Some(value) = waiter_for_cancel.value.lock().take() {
                inner_for_cancel.report_undelivered(value);
            }
        });
        self.inner.send_waiters.push_back(waiter);

        match cont.await {
            Resumption::Value(Ok(())) => Ok(()),
            Resumption::Value(Err(closed)) => Err(SendError::Closed(closed)),
            Resumption::Cancelled(cause) => Err(SendError::Cancelled(cause)),
        }
    }

    pub fn close(&self) {
        self.inner.close(None);
    }

    pub fn close_with_cause(&self, cause: AppError) {
        self.inner.close(Some(cause));
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl<T: Send + Unpin + 'static> Receiver<T> {
    /// Non-suspending best-effort receive. Returns `Ok(None)` if the buffer
    /// is empty but the channel is still open.
    pub fn try_receive(&self) -> Result<Option<T>, RecvError> {
        if let Some(value) = self.take_buffered_or_handoff() {
            return Ok(Some(value));
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RecvError::Closed(ClosedReceiveChannelException {
                cause: self.inner.close_cause.lock().clone(),
            }));
        }
        Ok(None)
    }

    fn take_buffered_or_handoff(&self) -> Option<T> {
        if let Some(value) = self.inner.buffer.lock().pop_front() {
            self.promote_one_send_waiter();
            return Some(value);
        }
        while let Some(waiter) = self.inner.send_waiters.pop_front() {
            if let Some(value) = waiter.value.lock().take() {
                let _ = waiter.resume.try_resume(Ok(()));
                return Some(value);
            }
            // Waiter was already cancelled and its value reclaimed; skip it.
        }
        None
    }

    /// After consuming a buffered element, a suspended sender (if any) may
    /// now have room — wake the oldest one.
    fn promote_one_send_waiter(&self) {
        while let Some(waiter) = self.inner.send_waiters.pop_front() {
            let Some(value) = waiter.value.lock().take() else {
                continue;
            };
            let mut buffer = self.inner.buffer.lock();
            buffer.push_back(value);
            drop(buffer);
            let _ = waiter.resume.try_resume(Ok(()));
            return;
        }
    }

    /// Suspends until an element is available or the channel closes
    /// (`spec.md` §4.9 `receive`).
    pub async fn receive(&self, job: Option<&Job>) -> Result<T, RecvError> {
        match self.receive_catching(job).await {
            Ok(value) => Ok(value),
            Err(err) => Err(err),
        }
    }

    /// Like [`Receiver::receive`] but distinguishes a closed-with-cause
    /// channel from cancellation at the type level, matching `spec.md`
    /// §4.9's `receiveCatching` (a `receive` that never panics on close).
    pub async fn receive_catching(&self, job: Option<&Job>) -> Result<T, RecvError> {
        if let Some(value) = self.take_buffered_or_handoff() {
            return Ok(value);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RecvError::Closed(ClosedReceiveChannelException {
                cause: self.inner.close_cause.lock().clone(),
            }));
        }

        let (cont, resume) = CancellableContinuation::new(job);
        self.inner.receive_waiters.push_back(resume);

        // Close may have raced us between the empty-check above and
        // registering the waiter; re-check and drain ourselves if so.
        if self.inner.closed.load(Ordering::Acquire) {
            if let Some(value) = self.take_buffered_or_handoff() {
                return Ok(value);
            }
        }

        match cont.await {
            Resumption::Value(Ok(value)) => Ok(value),
            Resumption::Value(Err(closed)) => Err(RecvError::Closed(closed)),
            Resumption::Cancelled(cause) => Err(RecvError::Cancelled(cause)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) && self.inner.buffer.lock().is_empty()
    }

    /// `spec.md` §4.9 `cancel(cause)`: closes the channel and drops whatever
    /// is still buffered (through the undelivered-element callback), so
    /// every pending and future `receive`/`send` fails instead of a close's
    /// "buffered values remain receivable" (`spec.md` §3.6).
    pub fn cancel(&self, cause: CancellationCause) {
        self.inner.cancel(cause);
    }
}
