//! Test-only infrastructure this crate's own test suite needs (`spec.md`
//! §4.E): a deterministic dispatcher so job-lifecycle and cancellation
//! tests can drive execution step by step instead of racing real threads.
//! This is deliberately *not* a polished debug builder — `spec.md` §1 places
//! "debug/test builders" out of scope for the public surface — it is the
//! same kind of in-tree harness the teacher's own contract-test crate
//! carries for exercising its own contracts.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::dispatcher::{Dispatcher, Runnable};

/// Queues every dispatched runnable instead of running it; [`Self::run_next`]
/// / [`Self::drain`] run them on the calling thread, on demand. Useful for
/// asserting ordering and for driving a job exactly one suspend point at a
/// time.
#[derive(Default)]
pub struct ManualDispatcher {
    queue: Mutex<VecDeque<Runnable>>,
}

impl ManualDispatcher {
    pub fn new() -> Self {
        ManualDispatcher {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the single oldest queued runnable, if any. Returns whether one
    /// was run.
    pub fn run_next(&self) -> bool {
        let next = self.queue.lock().pop_front();
        match next {
            Some(runnable) => {
                runnable();
                true
            }
            None => false,
        }
    }

    /// Runs every currently-queued runnable, including ones newly queued by
    /// runnables that ran during this call.
    pub fn drain(&self) {
        while self.run_next() {}
    }
}

impl Dispatcher for ManualDispatcher {
    fn dispatch(&self, runnable: Runnable) {
        self.queue.lock().push_back(runnable);
    }
}
