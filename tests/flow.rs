//! `flow`/`channel_flow`: a cold sequence that runs once per collector, and a
//! channel-backed variant whose producer runs as its own background job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use weft_core::channel::Capacity;
use weft_core::flow::{channel_flow, flow, Flow, FnCollector};
use weft_core::job::Job;

#[test]
fn cold_flow_runs_its_body_once_per_collect_call() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_for_body = runs.clone();

    let f = flow(move |collector: &mut dyn weft_core::flow::Collector<i32>, job| {
        let runs = runs_for_body.clone();
        let job = job.cloned();
        Box::pin(async move {
            runs.fetch_add(1, Ordering::SeqCst);
            collector.emit(1, job.as_ref()).await?;
            collector.emit(2, job.as_ref()).await?;
            Ok(())
        })
    });

    for _ in 0..3 {
        let mut seen = Vec::new();
        let job = Job::new_active(None, None, false, true, None);
        futures::executor::block_on(f.collect(&mut FnCollector(|v: i32| seen.push(v)), Some(&job)))
            .expect("collector never rejects a send in this test");
        assert_eq!(seen, vec![1, 2]);
    }

    assert_eq!(
        runs.load(Ordering::SeqCst),
        3,
        "a cold flow must re-run its body for every collector, never cache or share a run"
    );
}

#[test]
fn channel_flow_delivers_every_emitted_value_then_closes() {
    let (handle, rx) = channel_flow::<i32>(Capacity::Fixed(4), |tx| {
        Box::pin(async move {
            for v in [10, 20, 30] {
                tx.send(v, None).await?;
            }
            Ok(())
        })
    });

    let received = futures::executor::block_on(async {
        let mut out = Vec::new();
        while let Ok(v) = rx.receive(None).await {
            out.push(v);
        }
        out
    });

    futures::executor::block_on(handle.job().join());
    assert_eq!(received, vec![10, 20, 30]);
    assert!(handle.job().is_completed());
}
