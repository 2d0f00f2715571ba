//! Dispatcher scenarios: a thread pool's `limited` view actually caps how
//! many of its tasks run at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use weft_core::{Dispatcher, ThreadPoolDispatcher};

#[test]
fn limited_dispatcher_caps_concurrency() {
    let pool = Arc::new(ThreadPoolDispatcher::new("limit-test", 8));
    let limited = pool.limited(2);

    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let active = active.clone();
        let max_active = max_active.clone();
        let done = done.clone();
        limited.dispatch(Box::new(move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            active.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while done.load(Ordering::SeqCst) < 20 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(done.load(Ordering::SeqCst), 20, "every queued task must eventually run");
    assert!(
        max_active.load(Ordering::SeqCst) <= 2,
        "limited(2) must never run more than 2 tasks concurrently, saw {}",
        max_active.load(Ordering::SeqCst)
    );
}
