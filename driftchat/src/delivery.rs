//! Chat delivery facade.
//!
//! [`ChatDelivery`] is the only surface the presentation layer talks to.
//! It composes the dedupe store, retry policy, offline outbox, and
//! orderer into three operations: [`send_message`](ChatDelivery::send_message),
//! [`on_incoming_message`](ChatDelivery::on_incoming_message), and
//! [`mark_read`](ChatDelivery::mark_read). It owns the canonical ordered
//! message list per chat; the backend owns id and sequence assignment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};

use driftchat_proto::message::{
    ChatId, ClientId, IncomingMessage, Message, MessageId, MessageStatus, Timestamp, UserId,
    ValidationError, validate_body,
};

use crate::backend::{WriteEndpoint, WriteError};
use crate::connectivity::wait_until_online;
use crate::dedupe::DedupeStore;
use crate::ordering::{self, MergeOutcome};
use crate::outbox::{Outbox, ReplayStatus};
use crate::retry::{RetryError, RetryPolicy, with_retry};

/// Errors surfaced to the caller of [`ChatDelivery::send_message`].
///
/// Transient failures never appear here — they are queued and retried.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message body failed client-side validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The backend rejected the write permanently (auth, validation, 4xx).
    #[error("send rejected: {0}")]
    Rejected(#[source] WriteError),
}

/// Events emitted for the UI layer.
///
/// A retrying message must render as queued and a permanently failed one
/// as failed — a send never silently disappears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// A message's delivery status changed.
    StatusChanged {
        /// The chat holding the message.
        chat_id: ChatId,
        /// The message's client token (stable across reconciliation).
        client_id: ClientId,
        /// The new status.
        status: MessageStatus,
    },
    /// A send was handed to the offline outbox for later replay.
    MessageQueued {
        /// The chat holding the message.
        chat_id: ChatId,
        /// The queued message's client token.
        client_id: ClientId,
    },
    /// An incoming message was merged into the ordered list.
    MessageMerged {
        /// The chat the message was merged into.
        chat_id: ChatId,
        /// The merged message.
        message: Message,
    },
    /// A send failed permanently and will not be retried.
    SendFailed {
        /// The chat holding the message.
        chat_id: ChatId,
        /// The failed message's client token.
        client_id: ClientId,
        /// Why the send failed.
        reason: String,
    },
    /// `mark_read` transitioned this many messages.
    MessagesRead {
        /// The chat that was marked read.
        chat_id: ChatId,
        /// How many messages transitioned to `Read`.
        count: usize,
    },
}

/// Configuration for the delivery facade.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Backoff schedule shared by foreground sends and outbox replay.
    pub retry: RetryPolicy,
    /// Capacity of the UI event channel.
    pub event_buffer: usize,
    /// How often the replay task re-polls the outbox while online, in
    /// addition to connectivity-restored triggers.
    pub replay_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            event_buffer: 64,
            replay_interval: Duration::from_secs(30),
        }
    }
}

/// Composes dedupe, retry, outbox, and ordering into the send/receive/read
/// operations the presentation layer uses.
///
/// The dedupe store and outbox are injected and shared process-wide across
/// all open chats; callers must not assume isolation between chats.
/// Dropping the event receiver detaches the UI without aborting in-flight
/// sends — a message the user has tapped "send" on completes or fails, it
/// never vanishes.
pub struct ChatDelivery<B: WriteEndpoint> {
    backend: B,
    dedupe: Arc<DedupeStore>,
    outbox: Arc<Outbox>,
    connectivity: watch::Receiver<bool>,
    chats: Mutex<HashMap<ChatId, Vec<Message>>>,
    config: DeliveryConfig,
    event_tx: mpsc::Sender<DeliveryEvent>,
}

impl<B: WriteEndpoint> ChatDelivery<B> {
    /// Creates the facade with injected collaborators.
    ///
    /// Returns the facade and a receiver for [`DeliveryEvent`]s the UI
    /// layer should consume.
    pub fn new(
        backend: B,
        dedupe: Arc<DedupeStore>,
        outbox: Arc<Outbox>,
        connectivity: watch::Receiver<bool>,
        config: DeliveryConfig,
    ) -> (Self, mpsc::Receiver<DeliveryEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let facade = Self {
            backend,
            dedupe,
            outbox,
            connectivity,
            chats: Mutex::new(HashMap::new()),
            config,
            event_tx,
        };
        (facade, event_rx)
    }

    /// Sends a message, optimistically appending it first.
    ///
    /// The returned [`Message`] reflects the state at return time:
    /// `Delivered` with server id/seq on a successful round trip, `Sent`
    /// when the send was queued for offline replay.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Validation`] for an empty or oversized body,
    /// or [`SendError::Rejected`] when the backend fails permanently —
    /// in which case the optimistic entry is marked `Failed` so the UI
    /// renders it distinctly from sent and queued messages.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        body: impl Into<String>,
    ) -> Result<Message, SendError> {
        let body = body.into();
        validate_body(&body)?;

        let message = Message::optimistic(chat_id, sender_id, body);
        let client_id = message.client_id;
        let write = message.as_write();

        // Register the client token before anything can echo back through
        // the real-time channel.
        self.dedupe.insert(ordering::client_key(client_id));
        {
            let mut chats = self.chats.lock().await;
            let list = chats.entry(chat_id).or_default();
            let position = ordering::insertion_point(list, &message);
            list.insert(position, message.clone());
        }
        self.emit(DeliveryEvent::StatusChanged {
            chat_id,
            client_id,
            status: MessageStatus::Sent,
        });

        // Known-offline: skip the round trip entirely.
        if !*self.connectivity.borrow() {
            self.outbox.enqueue(write).await;
            self.emit(DeliveryEvent::MessageQueued { chat_id, client_id });
            return Ok(message);
        }

        let attempt = with_retry(
            &self.config.retry,
            || self.backend.insert_message(&write),
            |attempt, error| {
                tracing::debug!(
                    client_id = %client_id,
                    attempt,
                    error = %error,
                    "send attempt failed, backing off"
                );
            },
        )
        .await;

        match attempt {
            Ok(ack) => {
                let reconciled = self
                    .reconcile(chat_id, client_id, ack.id, Some(ack.seq), ack.created_at)
                    .await;
                Ok(reconciled.unwrap_or(message))
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::info!(
                    client_id = %client_id,
                    attempts,
                    error = %last,
                    "send exhausted retries, handing off to outbox"
                );
                self.outbox.enqueue(write).await;
                self.emit(DeliveryEvent::MessageQueued { chat_id, client_id });
                Ok(message)
            }
            Err(RetryError::Permanent(error)) => {
                self.mark_failed(chat_id, client_id, &error).await;
                Err(SendError::Rejected(error))
            }
        }
    }

    /// Routes a real-time row-insert event through dedupe and the orderer.
    ///
    /// The channel is at-least-once, so replays and the echo of our own
    /// optimistic insert both land here; duplicates are collapsed. An echo
    /// that arrives before the write acknowledgment reconciles the
    /// optimistic entry instead of being dropped, so a lost ack cannot
    /// strand a message without its server identity.
    pub async fn on_incoming_message(&self, raw: IncomingMessage) {
        let chat_id = raw.chat_id;

        if let Some(client_id) = raw.client_id {
            let unreconciled = {
                let chats = self.chats.lock().await;
                chats.get(&chat_id).is_some_and(|list| {
                    list.iter()
                        .any(|m| m.client_id == client_id && m.id.is_none())
                })
            };
            if unreconciled {
                tracing::debug!(
                    client_id = %client_id,
                    message_id = %raw.id,
                    "own row echoed before ack, reconciling optimistic entry"
                );
                self.reconcile(chat_id, client_id, raw.id, raw.seq, raw.created_at)
                    .await;
                return;
            }
        }

        let message = raw.into_message(MessageStatus::Delivered);
        let mut chats = self.chats.lock().await;
        let list = chats.entry(chat_id).or_default();
        match ordering::merge_message(list, message.clone(), &self.dedupe) {
            MergeOutcome::Inserted(position) => {
                drop(chats);
                tracing::debug!(
                    chat_id = %chat_id,
                    position,
                    "incoming message merged"
                );
                self.emit(DeliveryEvent::MessageMerged { chat_id, message });
            }
            MergeOutcome::Duplicate => {}
        }
    }

    /// Marks every message in the chat authored by someone other than
    /// `reader` as read. The reader's own messages and failed messages are
    /// never touched. Idempotent: a second call returns 0.
    pub async fn mark_read(&self, chat_id: ChatId, reader: UserId) -> usize {
        let mut chats = self.chats.lock().await;
        let Some(list) = chats.get_mut(&chat_id) else {
            return 0;
        };
        let mut count = 0;
        for message in list.iter_mut() {
            if message.sender_id != reader
                && message.status.can_advance_to(&MessageStatus::Read)
            {
                message.status = MessageStatus::Read;
                count += 1;
            }
        }
        drop(chats);
        if count > 0 {
            self.emit(DeliveryEvent::MessagesRead { chat_id, count });
        }
        count
    }

    /// Snapshot of the canonical ordered list for a chat.
    pub async fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.chats
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Current status of a message, looked up by client token.
    pub async fn status_of(&self, chat_id: ChatId, client_id: ClientId) -> Option<MessageStatus> {
        self.chats.lock().await.get(&chat_id).and_then(|list| {
            list.iter()
                .find(|m| m.client_id == client_id)
                .map(|m| m.status.clone())
        })
    }

    /// The injected write endpoint.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Shared handle to the offline outbox.
    #[must_use]
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Shared handle to the dedupe store.
    #[must_use]
    pub fn dedupe(&self) -> &Arc<DedupeStore> {
        &self.dedupe
    }

    /// Spawns the background replay driver.
    ///
    /// Replays the outbox when connectivity is restored, and re-polls on a
    /// fixed interval so sends queued while nominally online (flaky
    /// network) still drain. Acked items are reconciled into their chats;
    /// items that exhausted their budget are marked failed and reported.
    pub fn spawn_replay_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        B: 'static,
    {
        let delivery = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = delivery.connectivity.clone();
            loop {
                if !wait_until_online(&mut rx).await {
                    return; // connectivity monitor dropped
                }
                delivery.drain_outbox(&rx).await;

                // Sleep until connectivity changes or the poll interval
                // elapses, whichever comes first.
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    () = tokio::time::sleep(delivery.config.replay_interval) => {}
                }
            }
        })
    }

    /// Replays the outbox until it is empty, connectivity drops, or every
    /// remaining item is waiting out its backoff.
    async fn drain_outbox(&self, rx: &watch::Receiver<bool>) {
        while *rx.borrow() && !self.outbox.is_empty().await {
            let reports = self
                .outbox
                .replay_once(&self.backend, &self.config.retry)
                .await;

            let mut backoff: Option<Duration> = None;
            for report in reports {
                match report.status {
                    ReplayStatus::Acked(ack) => {
                        self.reconcile(
                            report.chat_id,
                            report.client_id,
                            ack.id,
                            Some(ack.seq),
                            ack.created_at,
                        )
                        .await;
                    }
                    ReplayStatus::Failed(error) => {
                        self.mark_failed(report.chat_id, report.client_id, &error)
                            .await;
                    }
                    ReplayStatus::Requeued { next_delay, .. } => {
                        backoff = Some(backoff.map_or(next_delay, |b| b.min(next_delay)));
                    }
                }
            }

            match backoff {
                Some(delay) => tokio::time::sleep(delay).await,
                None => break,
            }
        }
    }

    /// Applies the server identity to the optimistic entry with this
    /// client token: fills `id`/`seq`/`created_at`, advances the status to
    /// `Delivered`, re-sorts the entry into place, and registers the
    /// server id with the dedupe store.
    ///
    /// `seq` stays `None` when the server row carries none (legacy rows),
    /// keeping the entry in the unsequenced partition instead of inventing
    /// a sequence number.
    async fn reconcile(
        &self,
        chat_id: ChatId,
        client_id: ClientId,
        id: MessageId,
        seq: Option<u64>,
        created_at: Timestamp,
    ) -> Option<Message> {
        let mut chats = self.chats.lock().await;
        let list = chats.get_mut(&chat_id)?;
        let index = list.iter().position(|m| m.client_id == client_id)?;

        let mut message = list.remove(index);
        message.id = Some(id);
        message.seq = seq;
        message.created_at = created_at;
        if message.status.can_advance_to(&MessageStatus::Delivered) {
            message.status = MessageStatus::Delivered;
        }

        let position = ordering::insertion_point(list, &message);
        list.insert(position, message.clone());
        drop(chats);

        self.dedupe.insert(ordering::id_key(id));
        self.emit(DeliveryEvent::StatusChanged {
            chat_id,
            client_id,
            status: message.status.clone(),
        });
        Some(message)
    }

    /// Marks the optimistic entry failed and reports it; a failed send
    /// renders distinctly from sent and queued, never disappearing.
    async fn mark_failed(&self, chat_id: ChatId, client_id: ClientId, error: &WriteError) {
        let mut chats = self.chats.lock().await;
        if let Some(message) = chats
            .get_mut(&chat_id)
            .and_then(|list| list.iter_mut().find(|m| m.client_id == client_id))
        {
            let failed = MessageStatus::Failed(error.to_string());
            if message.status.can_advance_to(&failed) {
                message.status = failed;
            }
        }
        drop(chats);

        tracing::warn!(chat_id = %chat_id, client_id = %client_id, error = %error, "send failed permanently");
        self.emit(DeliveryEvent::SendFailed {
            chat_id,
            client_id,
            reason: error.to_string(),
        });
    }

    /// Best-effort event emission; a full or detached UI channel never
    /// blocks delivery.
    fn emit(&self, event: DeliveryEvent) {
        let _ = self.event_tx.try_send(event);
    }
}
