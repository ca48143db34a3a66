// tests/send_guard.rs
// Idempotent dispatch: one transport call per (destination, content) pair.

mod common;

use common::RecordingTransport;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use teams_alert_relay::notify::guard::{Dispatch, SendGuard};
use teams_alert_relay::store::Store;

fn guard() -> (SendGuard, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(Store::in_memory().unwrap());
    (SendGuard::new(store, transport.clone()), transport)
}

#[tokio::test]
async fn identical_content_is_sent_exactly_once() {
    let (guard, transport) = guard();

    let first = guard.dispatch("chat-1", "hello", &[]).await.unwrap();
    assert!(matches!(first, Dispatch::Sent(_)));

    let second = guard.dispatch("chat-1", "hello", &[]).await.unwrap();
    assert_eq!(second, Dispatch::Skipped);

    assert_eq!(transport.send_count(), 1);
}

#[tokio::test]
async fn other_destination_or_content_passes() {
    let (guard, transport) = guard();

    guard.dispatch("chat-1", "hello", &[]).await.unwrap();
    let other_chat = guard.dispatch("chat-2", "hello", &[]).await.unwrap();
    let other_text = guard.dispatch("chat-1", "hello again", &[]).await.unwrap();

    assert!(matches!(other_chat, Dispatch::Sent(_)));
    assert!(matches!(other_text, Dispatch::Sent(_)));
    assert_eq!(transport.send_count(), 3);
}

#[tokio::test]
async fn fingerprint_outlives_a_failed_transport_call() {
    // The claim happens before the send on purpose: a retried tick must never
    // double-send, even at the cost of losing a message whose transport call
    // failed mid-flight.
    let (guard, transport) = guard();
    transport.fail_sends.store(true, Ordering::SeqCst);

    let first = guard.dispatch("chat-1", "hello", &[]).await;
    assert!(first.is_err());

    transport.fail_sends.store(false, Ordering::SeqCst);
    let retry = guard.dispatch("chat-1", "hello", &[]).await.unwrap();
    assert_eq!(retry, Dispatch::Skipped);
    assert_eq!(transport.send_count(), 0);
}
