//! A concurrency-capping view over another dispatcher (`spec.md` §4.2
//! "limited").
//!
//! Dispatch stays fire-and-forget: `dispatch` never blocks the caller, so
//! the cap can't be enforced by having the caller wait for a permit the way
//! a suspending semaphore would. Instead, every submitted task is queued and
//! only as many as `parallelism` are ever handed to the wrapped dispatcher
//! at once; a task's completion admits the next queued one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Dispatcher, DynDispatcher, Runnable};

struct State {
    queue: Mutex<VecDeque<Runnable>>,
    in_flight: AtomicUsize,
}

pub struct LimitedDispatcher {
    inner: DynDispatcher,
    limit: usize,
    state: Arc<State>,
}

impl LimitedDispatcher {
    pub fn new(inner: DynDispatcher, parallelism: usize) -> Arc<Self> {
        Arc::new(LimitedDispatcher {
            inner,
            limit: parallelism.max(1),
            state: Arc::new(State {
                queue: Mutex::new(VecDeque::new()),
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    /// Admits queued tasks to `inner` until either the queue is empty or
    /// `limit` tasks are already in flight. Called after every enqueue and
    /// after every task finishes, so admission never stalls once a slot
    /// frees up.
    fn drain(inner: DynDispatcher, state: Arc<State>, limit: usize) {
        loop {
            let mut in_flight = state.in_flight.load(Ordering::Acquire);
            loop {
                if in_flight >= limit {
                    return;
                }
                match state
                    .in_flight
                    .compare_exchange_weak(in_flight, in_flight + 1, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => break,
                    Err(actual) => in_flight = actual,
                }
            }

            let Some(task) = state.queue.lock().pop_front() else {
                state.in_flight.fetch_sub(1, Ordering::AcqRel);
                return;
            };

            let inner_for_task = inner.clone();
            let state_for_task = state.clone();
            inner.dispatch(Box::new(move || {
                task();
                state_for_task.in_flight.fetch_sub(1, Ordering::AcqRel);
                LimitedDispatcher::drain(inner_for_task, state_for_task, limit);
            }));
        }
    }
}

impl Dispatcher for LimitedDispatcher {
    fn dispatch(&self, runnable: Runnable) {
        self.state.queue.lock().push_back(runnable);
        LimitedDispatcher::drain(self.inner.clone(), self.state.clone(), self.limit);
    }
}
