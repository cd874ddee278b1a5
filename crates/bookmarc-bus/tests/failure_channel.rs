//! End-to-end checks that the failure channel stays off the dispatch path.
//!
//! Historically, publishing handler failures back onto the bus caused a
//! feedback loop (a failing failure-handler generated more failure events
//! until memory ran out). The coordinator takes reports as direct method
//! calls instead, so a storm of failures produces exactly one report per
//! failed invocation and not one additional dispatch.

use bookmarc_bus::{priority, Envelope, EventBus, FnHandler, HandlerError};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_failure_reports_never_reenter_dispatch() {
    let bus = EventBus::new();
    bus.mark_ready().await;

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    bus.subscribe(
        "DATA.SAVE.COMPLETED",
        Arc::new(FnHandler::new("always-fails", move |_| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::logic("malformed book record"))
            })
        })),
        priority::NORMAL,
    )
    .await;

    for n in 0..20 {
        bus.dispatch(Envelope::new("DATA.SAVE.COMPLETED", json!({ "n": n })))
            .await;
    }

    // Exactly one invocation and one report per dispatched envelope; the
    // reports did not fan back into the bus as further dispatches.
    assert_eq!(invocations.load(Ordering::SeqCst), 20);
    assert_eq!(bus.coordinator().report_count(), 20);
    assert_eq!(bus.stats().total_dispatches, 20);
    assert_eq!(bus.stats().total_failures, 20);
    assert_eq!(bus.stats().queue_depth, 0);
}

#[tokio::test]
async fn test_terminal_failure_envelope_does_not_loop() {
    let bus = EventBus::new();
    bus.mark_ready().await;

    // UI-style listener for the terminal failure event. It completes, so
    // nothing downstream of it can fail again.
    let surfaced = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&surfaced);
    bus.subscribe(
        "DATA.SAVE.FAILED",
        Arc::new(FnHandler::new("popup-toast", move |envelope| {
            let counter = Arc::clone(&counter);
            let retryable = envelope.payload()["retryable"].as_bool();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "retryable": retryable }))
            })
        })),
        priority::HIGH,
    )
    .await;

    let saver = Arc::new(FnHandler::new("saver", |_| {
        Box::pin(async { Err(HandlerError::transient("backend unreachable")) })
    }));
    bus.subscribe("DATA.SAVE.REQUESTED", saver, priority::NORMAL)
        .await;

    let outcomes = bus
        .dispatch(Envelope::new("DATA.SAVE.REQUESTED", json!({ "book_id": 3 })))
        .await;
    assert!(outcomes[0].is_failure());

    // The supervisor surfaces the failure as a terminal envelope.
    bus.dispatch(Envelope::failure(
        "DATA.SAVE",
        "could not save book 3",
        true,
    ))
    .await;

    assert_eq!(surfaced.load(Ordering::SeqCst), 1);
    // Two dispatches total: the request and its terminal failure event.
    assert_eq!(bus.stats().total_dispatches, 2);
}
