//! A fixed-size worker-thread pool dispatcher.
//!
//! `spec.md` §4.2 only requires *a* multi-thread dispatcher to exist, not a
//! particular scheduling policy — no work-stealing, no fairness guarantees
//! (§1 Non-goals). A bounded number of OS threads pulling off one shared
//! queue is the simplest thing that satisfies "runs on one of a fixed set of
//! background threads", which is the contract every other crate in this
//! corpus's `runtime::executor`-shaped dispatcher gives.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::{Dispatcher, DynDispatcher, LimitedDispatcher, Runnable};

struct Shared {
    sender: Mutex<Option<Sender<Runnable>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// A dispatcher backed by `workers` OS threads sharing one task queue.
/// Dropping the last handle stops accepting new work and joins the threads
/// once drained.
pub struct ThreadPoolDispatcher {
    shared: Arc<Shared>,
}

impl ThreadPoolDispatcher {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Runnable>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || loop {
                        let task = {
                            let guard = rx.lock().unwrap_or_else(|p| p.into_inner());
                            guard.recv()
                        };
                        match task {
                            Ok(runnable) => runnable(),
                            Err(_) => break,
                        }
                    })
                    .expect("failed to spawn dispatcher worker thread")
            })
            .collect();

        ThreadPoolDispatcher {
            shared: Arc::new(Shared {
                sender: Mutex::new(Some(tx)),
                workers: Mutex::new(handles),
            }),
        }
    }
}

impl Dispatcher for ThreadPoolDispatcher {
    fn dispatch(&self, runnable: Runnable) {
        let guard = self.shared.sender.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(sender) = guard.as_ref() {
            // A send failure means every worker thread has already exited
            // (e.g. during shutdown); there is nowhere left to run the task.
            let _ = sender.send(runnable);
        }
    }

    /// A thread pool can meaningfully cap its own concurrency, unlike the
    /// unconfined dispatcher, so this overrides the trait's self-returning
    /// default with a real admission-queue view (`spec.md` §4.2 "limited").
    fn limited(self: Arc<Self>, parallelism: usize) -> DynDispatcher {
        LimitedDispatcher::new(self, parallelism)
    }
}

impl Drop for ThreadPoolDispatcher {
    fn drop(&mut self) {
        if Arc::strong_count(&self.shared) != 1 {
            return;
        }
        self.shared.sender.lock().unwrap_or_else(|p| p.into_inner()).take();
        let mut workers = self
            .shared
            .workers
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}
