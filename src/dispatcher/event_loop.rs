//! Thread-local unconfined event loop (`spec.md` §4.4).
//!
//! The unconfined dispatcher never schedules work onto another thread: a
//! resume that happens to run on a thread already inside one of its
//! dispatches is queued onto that thread's local FIFO instead of recursing.
//! `spec.md` calls the recursion counter a "use-count" — it exists purely to
//! bound stack depth, not to change ordering.

use std::cell::RefCell;
use std::collections::VecDeque;

use super::Runnable;

thread_local! {
    static LOOP: RefCell<LocalLoop> = RefCell::new(LocalLoop::default());
}

#[derive(Default)]
struct LocalLoop {
    queue: VecDeque<Runnable>,
    use_count: u32,
    draining: bool,
}

/// Runs `runnable` on the current thread, using the thread-local queue to
/// flatten reentrant dispatches instead of recursing.
///
/// If this thread is not already draining the loop, `runnable` runs
/// immediately and then drains anything it (transitively) enqueued. If this
/// thread *is* already draining, `runnable` is appended to the queue and
/// picked up by the outer drain.
pub(super) fn dispatch_unconfined(runnable: Runnable) {
    let should_drain = LOOP.with(|cell| {
        let mut state = cell.borrow_mut();
        state.use_count += 1;
        if state.draining {
            state.queue.push_back(runnable);
            false
        } else {
            state.draining = true;
            drop(state);
            runnable();
            true
        }
    });

    if should_drain {
        drain_local_queue();
        LOOP.with(|cell| {
            let mut state = cell.borrow_mut();
            state.draining = false;
            state.use_count = 0;
        });
    }
}

fn drain_local_queue() {
    loop {
        let next = LOOP.with(|cell| cell.borrow_mut().queue.pop_front());
        match next {
            Some(runnable) => runnable(),
            None => break,
        }
    }
}
