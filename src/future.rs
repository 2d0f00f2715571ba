//! Type-erased future/stream aliases shared across the crate.
//!
//! Dispatchers, job bodies and flow collectors all need an object-safe way to
//! hold "some future" or "some stream" without naming its concrete type. These
//! aliases are the crate's common currency for that, mirroring how the rest of
//! the ecosystem (`futures::future::BoxFuture`) does it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A boxed, pinned, `Send` future — the shape every job body and dispatcher
/// runnable is reduced to once it crosses an object-safe boundary.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Like [`BoxFuture`] but without the `Send` bound, for bodies that must stay
/// pinned to the thread that spawned them (e.g. under an unconfined or
/// main-thread dispatcher).
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A pull-based asynchronous sequence. `spec.md` §4.10 only requires the
/// collector/emitter pair for `Flow`; this trait is the polling primitive a
/// channel-backed flow adapts into that pair.
pub trait Stream {
    type Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>>;
}

pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// Drives a single future to completion on the calling thread, parking it
/// between wakeups instead of spinning. This is the crate's own tiny
/// executor — used to run a job's body on whichever dispatcher thread it
/// was scheduled onto, and by [`crate::flow::channel_flow`]'s dedicated
/// driver thread. It is not a general-purpose async runtime: it drives
/// exactly one future, with no task spawning of its own.
pub fn block_on<T>(mut fut: Pin<Box<dyn Future<Output = T> + Send>>) -> T {
    use std::sync::{Arc, Condvar, Mutex};
    use std::task::Wake;

    struct ThreadWaker {
        mutex: Mutex<bool>,
        condvar: Condvar,
    }

    impl Wake for ThreadWaker {
        fn wake(self: Arc<Self>) {
            *self.mutex.lock().unwrap() = true;
            self.condvar.notify_one();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            *self.mutex.lock().unwrap() = true;
            self.condvar.notify_one();
        }
    }

    let state = Arc::new(ThreadWaker {
        mutex: Mutex::new(false),
        condvar: Condvar::new(),
    });
    let waker = std::task::Waker::from(state.clone());
    let mut cx = Context::from_waker(&waker);

    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => {
                let mut ready = state.mutex.lock().unwrap();
                while !*ready {
                    ready = state.condvar.wait(ready).unwrap();
                }
                *ready = false;
            }
        }
    }
}
