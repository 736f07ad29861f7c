//! In-process [`WriteEndpoint`] implementation for tests and demos.
//!
//! Models the two backend behaviors the delivery layer depends on:
//! server-side `client_id` idempotency (a replayed token returns the
//! original acknowledgment instead of inserting a second row) and
//! monotonic per-chat sequence assignment. Failures can be scripted to
//! exercise the retry and offline paths.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use driftchat_proto::message::{
    ChatId, ClientId, IncomingMessage, MessageId, MessageWrite, Timestamp, WriteAck,
};

use super::{WriteEndpoint, WriteError};

#[derive(Default)]
struct State {
    next_id: i64,
    seqs: HashMap<ChatId, u64>,
    acks_by_client: HashMap<ClientId, WriteAck>,
    rows: Vec<IncomingMessage>,
    scripted_failures: VecDeque<WriteError>,
    attempts: u64,
}

/// In-memory backend that assigns row ids and per-chat sequence numbers.
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    /// Creates an empty backend with no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Scripts an error to be returned by the next insert attempt.
    ///
    /// Multiple calls queue multiple failures; once the queue is empty,
    /// inserts succeed again.
    pub fn fail_next(&self, error: WriteError) {
        self.state.lock().scripted_failures.push_back(error);
    }

    /// Scripts the same error for the next `count` insert attempts.
    pub fn fail_times(&self, error: &WriteError, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.scripted_failures.push_back(error.clone());
        }
    }

    /// Total insert attempts observed, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    /// Number of rows actually persisted.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Snapshot of all persisted rows, in insertion order.
    #[must_use]
    pub fn rows(&self) -> Vec<IncomingMessage> {
        self.state.lock().rows.clone()
    }

    /// The persisted row for a given idempotency token, if any.
    ///
    /// Useful for replaying a row through the real-time path in tests.
    #[must_use]
    pub fn row_for(&self, client_id: ClientId) -> Option<IncomingMessage> {
        self.state
            .lock()
            .rows
            .iter()
            .find(|row| row.client_id == Some(client_id))
            .cloned()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteEndpoint for InMemoryBackend {
    async fn insert_message(&self, write: &MessageWrite) -> Result<WriteAck, WriteError> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }

        // Server-side body checks mirror the hosted backend's row policy.
        if let Err(error) = write.validate() {
            return Err(WriteError::Validation(error.to_string()));
        }

        // Server-side idempotency: a replayed token returns the original ack.
        if let Some(ack) = state.acks_by_client.get(&write.client_id) {
            return Ok(*ack);
        }

        state.next_id += 1;
        let id = MessageId::new(state.next_id);
        let seq = {
            let counter = state.seqs.entry(write.chat_id).or_insert(0);
            *counter += 1;
            *counter
        };
        let ack = WriteAck {
            id,
            seq,
            created_at: Timestamp::now(),
        };

        state.acks_by_client.insert(write.client_id, ack);
        state.rows.push(IncomingMessage {
            id,
            chat_id: write.chat_id,
            sender_id: write.sender_id,
            body: write.body.clone(),
            client_id: Some(write.client_id),
            seq: Some(seq),
            created_at: ack.created_at,
        });

        Ok(ack)
    }
}
