//! `with_timeout` scenarios: a deadline that fires before the body finishes
//! surfaces `TimedOut`; a body that finishes first returns its value intact.

use std::time::Duration;

use weft_core::time::{with_timeout, ImmediateDelaySource, TimeoutOutcome};
use weft_core::Job;

struct NeverDelaySource;

impl weft_core::DelaySource for NeverDelaySource {
    fn schedule(&self, _duration: Duration, _wake: Box<dyn FnOnce() + Send>) {}
}

#[test]
fn prompt_timeout_cancels_a_body_that_never_finishes() {
    let parent = Job::new_active(None, None, false, true, None);

    let outcome = futures::executor::block_on(with_timeout(
        Duration::from_millis(50),
        &ImmediateDelaySource,
        &parent,
        |job| async move {
            weft_core::time::await_cancellation(Some(&job)).await;
        },
    ));

    assert!(matches!(outcome, Err(TimeoutOutcome::TimedOut)));
}

#[test]
fn with_timeout_returns_the_body_value_when_it_finishes_before_the_deadline() {
    let parent = Job::new_active(None, None, false, true, None);

    let outcome = futures::executor::block_on(with_timeout(
        Duration::from_secs(3600),
        &NeverDelaySource,
        &parent,
        |_job| async { 42 },
    ));

    assert_eq!(outcome.unwrap(), 42);
}

#[test]
fn an_outer_cancellation_is_not_mistaken_for_the_timeout() {
    // A `with_timeout` whose own deadline never fires must still propagate an
    // unrelated outer cancellation as plain `Cancelled`, not `TimedOut` — the
    // two are only conflated when the `TimeoutToken`s actually match.
    let parent = Job::new_active(None, None, false, true, None);
    parent.cancel(weft_core::error::CancellationCause::new("caller gave up"));

    let outcome = futures::executor::block_on(with_timeout(
        Duration::from_secs(3600),
        &NeverDelaySource,
        &parent,
        |job| async move {
            weft_core::time::await_cancellation(Some(&job)).await;
        },
    ));

    assert!(matches!(outcome, Err(TimeoutOutcome::Cancelled(_))));
}
