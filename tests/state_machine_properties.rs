//! Property tests for two state machines that are easy to get subtly wrong
//! under arbitrary operation sequences: a job's cancellation cause (the first
//! one recorded must stick, no matter how many more follow) and a channel's
//! FIFO ordering under an interleaved mix of sends and receives.

use proptest::prelude::*;

use weft_core::channel::{self, Capacity, Overflow};
use weft_core::error::CancellationCause;
use weft_core::Job;

#[derive(Clone, Debug)]
enum ChannelOp {
    Send(i32),
    Receive,
}

fn channel_op_strategy() -> impl Strategy<Value = ChannelOp> {
    prop_oneof![
        any::<i32>().prop_map(ChannelOp::Send),
        Just(ChannelOp::Receive),
    ]
}

proptest! {
    /// An unlimited, suspend-on-overflow channel never drops anything, so a
    /// `try_receive` must always return values in exactly the order they were
    /// `try_send`-ed, regardless of how sends and receives are interleaved.
    #[test]
    fn channel_preserves_fifo_order_under_arbitrary_interleaving(
        ops in prop::collection::vec(channel_op_strategy(), 0..200)
    ) {
        let (tx, rx) = channel::channel::<i32>(Capacity::Unlimited, Overflow::SuspendSender);
        let mut model: std::collections::VecDeque<i32> = std::collections::VecDeque::new();

        for op in ops {
            match op {
                ChannelOp::Send(v) => {
                    tx.try_send(v).expect("unlimited capacity never rejects a send");
                    model.push_back(v);
                }
                ChannelOp::Receive => {
                    let got = rx.try_receive().expect("channel is never closed in this test");
                    let expected = model.pop_front();
                    prop_assert_eq!(got, expected);
                }
            }
        }

        // Drain whatever is left and confirm the remaining order matches too.
        while let Some(expected) = model.pop_front() {
            let got = rx
                .try_receive()
                .expect("channel is never closed in this test")
                .expect("model says a value is still buffered");
            prop_assert_eq!(got, expected);
        }
        prop_assert_eq!(rx.try_receive().unwrap(), None);
    }

    /// Whichever cancellation reaches a job first fixes its terminal cause;
    /// every later `cancel()` call must be observable only as "this call did
    /// not win the race", never as a change to the recorded cause.
    #[test]
    fn first_cancellation_cause_is_sticky(
        messages in prop::collection::vec("[a-z]{1,12}", 1..20)
    ) {
        let job = Job::new_active(None, None, false, true, None);
        let first_message = messages[0].clone();

        let mut winners = 0;
        for message in &messages {
            if job.cancel(CancellationCause::new(message.clone())) {
                winners += 1;
            }
        }

        prop_assert_eq!(winners, 1, "exactly one cancel() call may win the race to cancel an Active job");
        prop_assert!(job.is_cancelled());
        match job.completion_cause() {
            Some(weft_core::JobCause::Cancelled(cause)) => {
                prop_assert_eq!(cause.message(), first_message.as_str());
            }
            other => prop_assert!(false, "expected a Cancelled cause, got {other:?}"),
        }
    }
}
