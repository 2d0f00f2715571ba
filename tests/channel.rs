//! Channel scenarios: a rendezvous handshake between a real producer/consumer
//! pair, and drop-oldest overflow with ordered undelivered-element reporting.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use weft_core::builders::launch;
use weft_core::channel::{self, Capacity, Overflow, RecvError};
use weft_core::context::ExecutionContext;
use weft_core::{CancellationCause, Dispatcher, ThreadPoolDispatcher};

#[test]
fn rendezvous_channel_delivers_values_in_order_then_closes() {
    let (tx, rx) = channel::channel::<i32>(Capacity::Rendezvous, Overflow::SuspendSender);
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(ThreadPoolDispatcher::new("chan-test", 2));
    let ctx = ExecutionContext::empty().with_dispatcher(dispatcher);

    let producer = launch(&ctx, move |job| async move {
        for v in [1, 2, 3] {
            tx.send(v, Some(&job)).await.expect("receiver is still open");
        }
        tx.close();
        Ok(())
    });

    let (received, tail) = futures::executor::block_on(async {
        let mut out = Vec::new();
        let tail = loop {
            match rx.receive_catching(None).await {
                Ok(v) => out.push(v),
                Err(e) => break e,
            }
        };
        (out, tail)
    });

    futures::executor::block_on(producer.join());
    assert_eq!(received, vec![1, 2, 3]);
    assert!(matches!(tail, RecvError::Closed(_)));
}

#[test]
fn drop_oldest_buffer_reports_undelivered_elements_in_order() {
    let undelivered = Arc::new(StdMutex::new(Vec::new()));
    let undelivered_for_handler = undelivered.clone();

    let (tx, rx) = channel::channel_with_undelivered_handler(
        Capacity::Fixed(2),
        Overflow::DropOldest,
        move |v: i32| undelivered_for_handler.lock().unwrap().push(v),
    );

    for v in [1, 2, 3, 4] {
        tx.try_send(v).expect("DropOldest never reports the channel as full");
    }

    let mut received = Vec::new();
    while let Ok(Some(v)) = rx.try_receive() {
        received.push(v);
    }

    assert_eq!(received, vec![3, 4]);
    assert_eq!(*undelivered.lock().unwrap(), vec![1, 2]);
}

#[test]
fn drop_latest_discards_the_incoming_value_and_reports_it() {
    let undelivered = Arc::new(StdMutex::new(Vec::new()));
    let undelivered_for_handler = undelivered.clone();

    let (tx, rx) = channel::channel_with_undelivered_handler(
        Capacity::Fixed(1),
        Overflow::DropLatest,
        move |v: i32| undelivered_for_handler.lock().unwrap().push(v),
    );

    tx.try_send(1).unwrap();
    tx.try_send(2).unwrap();
    tx.try_send(3).unwrap();

    assert_eq!(rx.try_receive().unwrap(), Some(1));
    assert_eq!(rx.try_receive().unwrap(), None);
    assert_eq!(*undelivered.lock().unwrap(), vec![2, 3]);
}

#[test]
fn try_send_on_suspend_sender_overflow_reports_full_without_blocking() {
    let (tx, _rx) = channel::channel::<i32>(Capacity::Fixed(1), Overflow::SuspendSender);
    tx.try_send(1).unwrap();
    let err = tx.try_send(2).unwrap_err();
    assert!(matches!(err, channel::SendError::Full));
}

#[test]
fn cancel_drops_the_buffer_unlike_close() {
    let undelivered = Arc::new(StdMutex::new(Vec::new()));
    let undelivered_for_handler = undelivered.clone();

    let (tx, rx) = channel::channel_with_undelivered_handler(
        Capacity::Fixed(4),
        Overflow::SuspendSender,
        move |v: i32| undelivered_for_handler.lock().unwrap().push(v),
    );

    tx.try_send(1).unwrap();
    tx.try_send(2).unwrap();

    rx.cancel(CancellationCause::new("shutting down"));

    // A cancelled channel fails a receive instead of handing back whatever
    // was still buffered — the opposite of `close`, which leaves buffered
    // values receivable.
    let err = futures::executor::block_on(rx.receive_catching(None));
    assert!(matches!(err, Err(RecvError::Closed(_))));
    assert_eq!(
        *undelivered.lock().unwrap(),
        vec![1, 2],
        "cancel must route every dropped buffered value through the undelivered-element handler"
    );

    // A send against an already-cancelled channel fails too.
    let send_err = tx.try_send(3);
    assert!(send_err.is_err());
}
