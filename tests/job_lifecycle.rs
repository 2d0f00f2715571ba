//! Structured-concurrency scenarios: a scope waits for its children, a
//! cancelled parent cascades to every child, and a supervisor isolates a
//! failing child instead of tearing down its siblings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use weft_core::builders::{coroutine_scope, launch, launch_with_start, r#async, supervisor_scope, Start};
use weft_core::context::ExecutionContext;
use weft_core::error::{AppError, CancellationCause};
use weft_core::time::{with_timeout, ImmediateDelaySource};
use weft_core::{Dispatcher, Job, ThreadPoolDispatcher, UnconfinedDispatcher};

fn unconfined_context() -> ExecutionContext {
    ExecutionContext::empty().with_dispatcher(Arc::new(UnconfinedDispatcher::new()))
}

#[derive(Debug, thiserror::Error)]
#[error("boom")]
struct Boom;

/// A `DelaySource` that never fires, for bodies that are expected to win a
/// race against their own deadline by finishing first.
struct NeverDelaySource;

impl weft_core::DelaySource for NeverDelaySource {
    fn schedule(&self, _duration: Duration, _wake: Box<dyn FnOnce() + Send>) {}
}

#[test]
fn structured_join_waits_for_inner_launch() {
    let counter = Arc::new(AtomicUsize::new(0));
    let ctx = unconfined_context();
    let counter_for_scope = counter.clone();

    let result = futures::executor::block_on(coroutine_scope(&ctx, move |scope_ctx| async move {
        launch(&scope_ctx, move |job| {
            let counter = counter_for_scope.clone();
            async move {
                weft_core::time::delay(Duration::from_millis(10), &ImmediateDelaySource, Some(&job))
                    .await
                    .ok();
                counter.store(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }));

    assert!(result.is_ok(), "scope should not observe any failure");
    assert_eq!(
        counter.load(Ordering::SeqCst),
        1,
        "coroutine_scope must not return before its launched child finished"
    );
}

#[test]
fn cancellation_cascades_to_every_child() {
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(ThreadPoolDispatcher::new("cascade-test", 4));
    let parent = Job::new_active(None, None, false, true, None);
    let ctx = ExecutionContext::empty()
        .with_job(parent.clone())
        .with_dispatcher(dispatcher);

    let children: Vec<Job> = (0..3)
        .map(|_| {
            launch(&ctx, |job| async move {
                let cause = weft_core::time::await_cancellation(Some(&job)).await;
                assert!(cause.is_cancellation());
                Ok(())
            })
        })
        .collect();

    parent.cancel(CancellationCause::new("shutting down"));
    futures::executor::block_on(parent.join());

    assert!(parent.is_cancelled());
    for child in &children {
        futures::executor::block_on(child.join());
        assert!(child.is_cancelled());
    }
}

#[test]
fn supervisor_scope_isolates_a_failing_child() {
    let ctx = unconfined_context();
    let second_ran = Arc::new(AtomicUsize::new(0));
    let second_ran_for_scope = second_ran.clone();

    let result = futures::executor::block_on(supervisor_scope(&ctx, move |scope_ctx| {
        let second_ran = second_ran_for_scope.clone();
        async move {
            let failing = r#async(&scope_ctx, |_job| async move {
                Err::<(), AppError>(AppError::new(Boom))
            });
            let _ok_child = launch(&scope_ctx, move |_job| {
                let second_ran = second_ran.clone();
                async move {
                    second_ran.store(1, Ordering::SeqCst);
                    Ok(())
                }
            });

            // The failure is only ever observed at this explicit await site —
            // a supervisor never cancels siblings or itself for it.
            let failure = failing.await_result().await;
            assert!(failure.is_err());
        }
    }));

    assert!(
        result.is_ok(),
        "a supervisor scope must complete normally despite a failing child"
    );
    assert_eq!(second_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn with_timeout_does_not_leak_its_scope_job_into_an_enclosing_scope() {
    // Regression test: `with_timeout`'s internal scope job must complete
    // itself once `body` resolves, or an enclosing `coroutine_scope` that
    // wraps it would never see its own children list empty out and would
    // hang in `join` forever instead of returning.
    let ctx = unconfined_context();

    let result = futures::executor::block_on(coroutine_scope(&ctx, |scope_ctx| async move {
        let parent = scope_ctx.job().expect("scope context always carries a job");
        with_timeout(Duration::from_secs(3600), &NeverDelaySource, &parent, |_job| async {
            7
        })
        .await
    }));

    assert_eq!(result.unwrap().unwrap(), 7);
}

#[test]
fn lazy_start_defers_dispatch_until_start_is_called() {
    let ctx = unconfined_context();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_for_body = ran.clone();

    let job = launch_with_start(&ctx, Start::Lazy, move |_job| {
        let ran = ran_for_body.clone();
        async move {
            ran.store(1, Ordering::SeqCst);
            Ok(())
        }
    });

    assert_eq!(ran.load(Ordering::SeqCst), 0, "a lazy job must not run before start/join");
    assert!(job.start(), "start() reports whether it was the call that actually started the job");
    futures::executor::block_on(job.join());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn lazy_start_is_triggered_implicitly_by_join() {
    let ctx = unconfined_context();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_for_body = ran.clone();

    let job = launch_with_start(&ctx, Start::Lazy, move |_job| {
        let ran = ran_for_body.clone();
        async move {
            ran.store(1, Ordering::SeqCst);
            Ok(())
        }
    });

    futures::executor::block_on(job.join());
    assert_eq!(ran.load(Ordering::SeqCst), 1, "join() must implicitly start a lazy job");
}

#[test]
fn undispatched_start_runs_inline_up_to_first_suspension() {
    let ctx = unconfined_context();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_for_body = ran.clone();

    let job = launch_with_start(&ctx, Start::Undispatched, move |_job| {
        let ran = ran_for_body.clone();
        async move {
            ran.store(1, Ordering::SeqCst);
            Ok(())
        }
    });

    assert_eq!(
        ran.load(Ordering::SeqCst),
        1,
        "a body with no suspension point must have already finished by the time launch_with_start returns"
    );
    futures::executor::block_on(job.join());
    assert!(job.is_completed());
}
