//! Integration tests for duplicate collapse on the real-time channel.
//!
//! The channel is at-least-once: the client's own writes echo back, and
//! rows can be replayed after reconnects. Exactly one copy of each message
//! must survive, keyed by server id and by client idempotency token.

use std::sync::Arc;

use tokio::sync::mpsc;

use driftchat::backend::WriteEndpoint;
use driftchat::backend::memory::InMemoryBackend;
use driftchat::connectivity::ConnectivityMonitor;
use driftchat::dedupe::{DedupeConfig, DedupeStore};
use driftchat::delivery::{ChatDelivery, DeliveryConfig, DeliveryEvent};
use driftchat::outbox::Outbox;

use driftchat_proto::message::{
    ChatId, ClientId, IncomingMessage, MessageId, MessageStatus, Timestamp, UserId,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup(
    online: bool,
) -> (
    Arc<ChatDelivery<InMemoryBackend>>,
    mpsc::Receiver<DeliveryEvent>,
    ConnectivityMonitor,
) {
    let monitor = ConnectivityMonitor::new(online);
    let (facade, events) = ChatDelivery::new(
        InMemoryBackend::new(),
        Arc::new(DedupeStore::new(DedupeConfig::default())),
        Arc::new(Outbox::new(3)),
        monitor.subscribe(),
        DeliveryConfig::default(),
    );
    (Arc::new(facade), events, monitor)
}

fn peer_row(chat_id: ChatId, sender_id: UserId, id: i64, seq: u64, body: &str) -> IncomingMessage {
    IncomingMessage {
        id: MessageId::new(id),
        chat_id,
        sender_id,
        body: body.to_owned(),
        client_id: Some(ClientId::new()),
        seq: Some(seq),
        created_at: Timestamp::from_millis(seq * 1000),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn own_write_echoed_by_the_subscription_is_collapsed() {
    let (facade, _events, _monitor) = setup(true);
    let chat_id = ChatId::new();
    let me = UserId::new();

    let message = facade.send_message(chat_id, me, "hello").await.unwrap();

    // The subscription delivers the row we just inserted, twice.
    let echo = facade.backend().row_for(message.client_id).unwrap();
    facade.on_incoming_message(echo.clone()).await;
    facade.on_incoming_message(echo).await;

    let list = facade.messages(chat_id).await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, message.id);
    assert_eq!(list[0].status, MessageStatus::Delivered);
}

#[tokio::test(start_paused = true)]
async fn replayed_peer_rows_are_collapsed_by_server_id() {
    let (facade, mut events, _monitor) = setup(true);
    let chat_id = ChatId::new();
    let peer = UserId::new();

    let row = peer_row(chat_id, peer, 10, 1, "from peer");
    facade.on_incoming_message(row.clone()).await;
    facade.on_incoming_message(row).await;

    assert_eq!(facade.messages(chat_id).await.len(), 1);

    let merges = {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DeliveryEvent::MessageMerged { .. }) {
                count += 1;
            }
        }
        count
    };
    assert_eq!(merges, 1, "only the first copy is announced");
}

#[tokio::test(start_paused = true)]
async fn out_of_order_replays_still_produce_a_sorted_list() {
    let (facade, _events, _monitor) = setup(true);
    let chat_id = ChatId::new();
    let peer = UserId::new();

    // Arrival order 3, 1, 3 (replay), 2.
    facade.on_incoming_message(peer_row(chat_id, peer, 3, 3, "c")).await;
    facade.on_incoming_message(peer_row(chat_id, peer, 1, 1, "a")).await;
    facade.on_incoming_message(peer_row(chat_id, peer, 3, 3, "c")).await;
    facade.on_incoming_message(peer_row(chat_id, peer, 2, 2, "b")).await;

    let list = facade.messages(chat_id).await;
    let seqs: Vec<Option<u64>> = list.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![Some(1), Some(2), Some(3)]);
}

#[tokio::test(start_paused = true)]
async fn lost_ack_with_echo_and_replay_converges_to_one_message() {
    // The worst case: the write reached the server but the ack was lost.
    // The optimistic entry is queued for replay, the real-time echo
    // arrives first, then connectivity-restored replay re-sends the same
    // idempotency token. One row, one list entry.
    let (facade, _events, monitor) = setup(false);
    let chat_id = ChatId::new();
    let me = UserId::new();

    let message = facade.send_message(chat_id, me, "hello").await.unwrap();
    assert_eq!(facade.outbox().len().await, 1);

    // The server persisted the write even though the client never saw the
    // ack.
    let queued = facade.outbox().snapshot().await;
    facade
        .backend()
        .insert_message(&queued[0].write)
        .await
        .unwrap();

    // Echo arrives over the real-time channel while still "offline" from
    // the write path's point of view: it reconciles the optimistic entry.
    let echo = facade.backend().row_for(message.client_id).unwrap();
    facade.on_incoming_message(echo).await;

    let list = facade.messages(chat_id).await;
    assert_eq!(list.len(), 1);
    assert!(list[0].id.is_some());

    // Replay re-sends the queued write; the backend recognizes the token
    // and returns the original ack instead of inserting a second row.
    let handle = facade.spawn_replay_task();
    monitor.set_online(true);
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    assert!(facade.outbox().is_empty().await);
    assert_eq!(facade.backend().row_count(), 1, "idempotent server-side");
    assert_eq!(facade.messages(chat_id).await.len(), 1);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn json_rows_off_the_wire_are_collapsed_like_any_other() {
    let (facade, _events, _monitor) = setup(true);
    let chat_id = ChatId::new();

    // Rows arrive from the subscription as JSON payloads.
    let payload = serde_json::json!({
        "id": 7,
        "chat_id": chat_id,
        "sender_id": UserId::new(),
        "body": "over the wire",
        "client_id": ClientId::new(),
        "seq": 1,
        "created_at": 1_700_000_000_000u64,
    });
    let row: IncomingMessage = serde_json::from_value(payload).unwrap();

    facade.on_incoming_message(row.clone()).await;
    facade.on_incoming_message(row).await;

    let list = facade.messages(chat_id).await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, Some(MessageId::new(7)));
    assert_eq!(list[0].body, "over the wire");
}

#[tokio::test(start_paused = true)]
async fn duplicates_are_tracked_across_chats_in_one_store() {
    let (facade, _events, _monitor) = setup(true);
    let chat_a = ChatId::new();
    let chat_b = ChatId::new();
    let peer = UserId::new();

    facade.on_incoming_message(peer_row(chat_a, peer, 1, 1, "a")).await;
    facade.on_incoming_message(peer_row(chat_b, peer, 2, 1, "b")).await;

    assert_eq!(facade.messages(chat_a).await.len(), 1);
    assert_eq!(facade.messages(chat_b).await.len(), 1);
    assert_eq!(facade.dedupe().stats().len, 4, "id and token keys per row");
}
