//! Integration tests for the offline send path.
//!
//! Verifies the end-to-end guarantee for a send composed without
//! connectivity: the message is queued (never lost), replayed when
//! connectivity is restored, acknowledged exactly once server-side, and
//! reconciled into the ordered list with its server identity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use driftchat::backend::WriteError;
use driftchat::backend::memory::InMemoryBackend;
use driftchat::connectivity::ConnectivityMonitor;
use driftchat::dedupe::{DedupeConfig, DedupeStore};
use driftchat::delivery::{ChatDelivery, DeliveryConfig, DeliveryEvent};
use driftchat::outbox::Outbox;

use driftchat_proto::message::{ChatId, MessageStatus, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup(
    online: bool,
    outbox_retries: u32,
) -> (
    Arc<ChatDelivery<InMemoryBackend>>,
    mpsc::Receiver<DeliveryEvent>,
    ConnectivityMonitor,
) {
    init_tracing();
    let monitor = ConnectivityMonitor::new(online);
    let (facade, events) = ChatDelivery::new(
        InMemoryBackend::new(),
        Arc::new(DedupeStore::new(DedupeConfig::default())),
        Arc::new(Outbox::new(outbox_retries)),
        monitor.subscribe(),
        DeliveryConfig::default(),
    );
    (Arc::new(facade), events, monitor)
}

fn drain(events: &mut mpsc::Receiver<DeliveryEvent>) -> Vec<DeliveryEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn queued_sends_replay_after_connectivity_restored() {
    let (facade, mut events, monitor) = setup(false, 3);
    let chat_id = ChatId::new();
    let me = UserId::new();

    let first = facade.send_message(chat_id, me, "first").await.unwrap();
    let second = facade.send_message(chat_id, me, "second").await.unwrap();
    assert_eq!(facade.outbox().len().await, 2);
    assert_eq!(facade.backend().attempts(), 0, "no round trip while offline");

    let handle = facade.spawn_replay_task();
    monitor.set_online(true);
    sleep(Duration::from_secs(1)).await;

    assert!(facade.outbox().is_empty().await);
    assert_eq!(facade.backend().row_count(), 2);

    // Replay preserved compose order: seq follows FIFO queue order.
    let list = facade.messages(chat_id).await;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].client_id, first.client_id);
    assert_eq!(list[0].seq, Some(1));
    assert_eq!(list[1].client_id, second.client_id);
    assert_eq!(list[1].seq, Some(2));
    assert!(list.iter().all(|m| m.status == MessageStatus::Delivered));

    let delivered = drain(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                DeliveryEvent::StatusChanged {
                    status: MessageStatus::Delivered,
                    ..
                }
            )
        })
        .count();
    assert_eq!(delivered, 2);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn replay_retries_transient_failures_with_backoff() {
    let (facade, _events, monitor) = setup(false, 3);
    let chat_id = ChatId::new();

    let message = facade
        .send_message(chat_id, UserId::new(), "flaky network")
        .await
        .unwrap();
    facade.backend().fail_times(&WriteError::Timeout, 2);

    let handle = facade.spawn_replay_task();
    monitor.set_online(true);
    // Two backoff waits (at most 2s and 3s with jitter) fit well inside.
    sleep(Duration::from_secs(10)).await;

    assert_eq!(facade.backend().attempts(), 3);
    assert!(facade.outbox().is_empty().await);
    assert_eq!(
        facade.status_of(chat_id, message.client_id).await,
        Some(MessageStatus::Delivered)
    );

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn exhausting_the_replay_budget_marks_the_message_failed() {
    let (facade, mut events, monitor) = setup(false, 1);
    let chat_id = ChatId::new();

    let message = facade
        .send_message(chat_id, UserId::new(), "doomed")
        .await
        .unwrap();
    facade.backend().fail_times(&WriteError::Timeout, 10);

    let handle = facade.spawn_replay_task();
    monitor.set_online(true);
    sleep(Duration::from_secs(10)).await;

    // Budget of 1 retry: two attempts total, then terminal failure.
    assert_eq!(facade.backend().attempts(), 2);
    assert!(facade.outbox().is_empty().await, "failed items leave the queue");
    assert!(matches!(
        facade.status_of(chat_id, message.client_id).await,
        Some(MessageStatus::Failed(_))
    ));
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, DeliveryEvent::SendFailed { .. })),
        "a failed send is reported, never silently dropped"
    );

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn nothing_replays_while_still_offline() {
    let (facade, _events, _monitor) = setup(false, 3);

    facade
        .send_message(ChatId::new(), UserId::new(), "waiting")
        .await
        .unwrap();
    let handle = facade.spawn_replay_task();
    sleep(Duration::from_secs(300)).await;

    assert_eq!(facade.backend().attempts(), 0);
    assert_eq!(facade.outbox().len().await, 1);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn replay_stops_when_connectivity_drops_mid_drain() {
    let (facade, _events, monitor) = setup(false, 5);
    let chat_id = ChatId::new();

    facade
        .send_message(chat_id, UserId::new(), "interrupted")
        .await
        .unwrap();
    // Every attempt fails, so the item keeps requeueing until we go
    // offline again.
    facade.backend().fail_times(&WriteError::Timeout, 100);

    let handle = facade.spawn_replay_task();
    monitor.set_online(true);
    sleep(Duration::from_secs(3)).await;
    monitor.set_online(false);
    let attempts_when_offline = facade.backend().attempts();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(
        facade.backend().attempts(),
        attempts_when_offline,
        "no further attempts after going offline"
    );
    assert_eq!(facade.outbox().len().await, 1, "the item is still queued");

    handle.abort();
}
