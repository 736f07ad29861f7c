//! Offline send queue for unacknowledged outgoing messages.
//!
//! Every queued item keeps the original [`MessageWrite`], idempotency
//! token included, so replays converge server-side instead of producing
//! duplicate rows. Items survive until acknowledged or until the per-item
//! retry budget is spent, at which point they are reported as permanently
//! failed — never silently dropped.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;

use driftchat_proto::message::{ChatId, ClientId, MessageWrite, Timestamp, WriteAck};

use crate::backend::{WriteEndpoint, WriteError};
use crate::retry::{ErrorClass, RetryPolicy, classify};

/// One unacknowledged outgoing message.
///
/// State machine: `Queued → Sending → Acked` on success; transient
/// failures requeue with an incremented retry count; exceeding the budget
/// or hitting a permanent error is terminal `Failed`.
#[derive(Debug, Clone)]
pub struct QueuedSend {
    /// The original write payload; `client_id` is reused on every replay.
    pub write: MessageWrite,
    /// Replay attempts made so far.
    pub retries: u32,
    /// When the last replay attempt happened, if any.
    pub last_attempt: Option<Timestamp>,
}

/// Per-item outcome of one replay pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStatus {
    /// The backend acknowledged the write.
    Acked(WriteAck),
    /// Transient failure; the item went back into the queue.
    Requeued {
        /// Attempts made so far.
        retries: u32,
        /// Suggested wait before the next pass, from the backoff schedule.
        next_delay: Duration,
    },
    /// Terminal failure: permanent error or retry budget exhausted.
    Failed(WriteError),
}

/// Outcome of one queued item after a replay pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Token identifying the optimistic message this item backs.
    pub client_id: ClientId,
    /// The chat the message belongs to.
    pub chat_id: ChatId,
    /// What happened to the item.
    pub status: ReplayStatus,
}

/// FIFO queue of sends awaiting connectivity or retry.
///
/// Shared process-wide across all open chats; unbounded, since depth is
/// bounded in practice by how fast a user can compose messages.
pub struct Outbox {
    items: Mutex<VecDeque<QueuedSend>>,
    max_retries: u32,
}

impl Outbox {
    /// Creates an empty outbox with the given per-item retry budget.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_retries,
        }
    }

    /// Queues a write for later replay.
    pub async fn enqueue(&self, write: MessageWrite) {
        tracing::debug!(
            client_id = %write.client_id,
            chat_id = %write.chat_id,
            "message queued for offline replay"
        );
        self.items.lock().await.push_back(QueuedSend {
            write,
            retries: 0,
            last_attempt: None,
        });
    }

    /// Number of queued items.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Snapshot of the queued items, front first.
    pub async fn snapshot(&self) -> Vec<QueuedSend> {
        self.items.lock().await.iter().cloned().collect()
    }

    /// Attempts every queued item exactly once against the backend.
    ///
    /// Acked and terminally failed items leave the queue; transient
    /// failures within budget go back in with `retries + 1` and a
    /// suggested backoff delay from `policy`. The caller decides when to
    /// run the next pass (connectivity event or backoff timer).
    pub async fn replay_once<B: WriteEndpoint>(
        &self,
        backend: &B,
        policy: &RetryPolicy,
    ) -> Vec<ReplayReport> {
        let batch: Vec<QueuedSend> = {
            let mut items = self.items.lock().await;
            items.drain(..).collect()
        };
        if batch.is_empty() {
            return Vec::new();
        }

        let mut reports = Vec::with_capacity(batch.len());
        for mut item in batch {
            let client_id = item.write.client_id;
            let chat_id = item.write.chat_id;
            item.last_attempt = Some(Timestamp::now());

            let status = match backend.insert_message(&item.write).await {
                Ok(ack) => {
                    tracing::debug!(client_id = %client_id, id = %ack.id, "queued send acked");
                    ReplayStatus::Acked(ack)
                }
                Err(error) if classify(&error) == ErrorClass::Permanent => {
                    tracing::warn!(
                        client_id = %client_id,
                        error = %error,
                        "queued send failed permanently"
                    );
                    ReplayStatus::Failed(error)
                }
                Err(error) => {
                    item.retries += 1;
                    if item.retries > self.max_retries {
                        tracing::warn!(
                            client_id = %client_id,
                            retries = item.retries,
                            error = %error,
                            "queued send exceeded retry budget"
                        );
                        ReplayStatus::Failed(error)
                    } else {
                        let retries = item.retries;
                        let next_delay = policy.jittered_delay(retries - 1);
                        self.items.lock().await.push_back(item);
                        ReplayStatus::Requeued {
                            retries,
                            next_delay,
                        }
                    }
                }
            };

            reports.push(ReplayReport {
                client_id,
                chat_id,
                status,
            });
        }
        reports
    }
}
