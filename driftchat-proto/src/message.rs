//! Message and identifier types shared between the delivery layer and the
//! hosted backend.
//!
//! The backend owns assignment of [`MessageId`] and the per-chat sequence
//! number; the client owns [`ClientId`] generation. Rows arrive from the
//! real-time channel as JSON, so every type here derives serde.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message body size in bytes (8 KB).
pub const MAX_BODY_SIZE: usize = 8 * 1024;

/// Server-assigned row identifier for a persisted message.
///
/// Absent on a message until the write endpoint acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(i64);

impl MessageId {
    /// Wraps a raw row id from the backend.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated idempotency token, based on UUID v7 for time-ordering.
///
/// Generated once per send and reused across every retry and offline replay
/// of that send, so the backend can collapse duplicate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Creates a new time-ordered idempotency token (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ClientId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a chat (direct thread or group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(Uuid);

impl ChatId {
    /// Creates a new chat identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ChatId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a user account on the hosted backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new user identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `UserId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Tracks the delivery lifecycle of a message.
///
/// Transitions are monotonic: `Sent → Delivered → Read`. `Failed` is
/// terminal and reachable only from `Sent` (a message the backend has
/// acknowledged can no longer fail client-side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Optimistically appended locally, not yet acknowledged by the backend.
    Sent,
    /// Persisted by the backend (id and sequence number assigned).
    Delivered,
    /// Read by the chat counterpart.
    Read,
    /// Send permanently failed with a reason; will not be retried.
    Failed(String),
}

impl MessageStatus {
    /// Whether advancing from `self` to `next` respects the status lattice.
    #[must_use]
    pub const fn can_advance_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Sent, Self::Delivered | Self::Read | Self::Failed(_))
            | (Self::Delivered, Self::Read) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message body is empty.
    #[error("message body is empty")]
    Empty,
    /// Message body exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the body in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates a message body for sending.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for an empty body, or
/// [`ValidationError::TooLarge`] if it exceeds [`MAX_BODY_SIZE`].
pub const fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = body.len();
    if size > MAX_BODY_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_BODY_SIZE,
        });
    }
    Ok(())
}

/// A chat message as held in the client's canonical ordered list.
///
/// `id` and `seq` stay `None` on an optimistic entry until the write
/// endpoint acknowledges the send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned row id; `None` until acknowledged.
    pub id: Option<MessageId>,
    /// Client-generated idempotency token, stable across retries.
    pub client_id: ClientId,
    /// Which chat this message belongs to.
    pub chat_id: ChatId,
    /// Who sent this message.
    pub sender_id: UserId,
    /// The message text.
    pub body: String,
    /// Per-chat sequence number assigned by the backend at write time.
    pub seq: Option<u64>,
    /// When the message was created (client clock until reconciled).
    pub created_at: Timestamp,
    /// Current delivery status.
    pub status: MessageStatus,
}

impl Message {
    /// Builds an optimistic local message, ready for appending before the
    /// write endpoint has been contacted.
    #[must_use]
    pub fn optimistic(chat_id: ChatId, sender_id: UserId, body: impl Into<String>) -> Self {
        Self {
            id: None,
            client_id: ClientId::new(),
            chat_id,
            sender_id,
            body: body.into(),
            seq: None,
            created_at: Timestamp::now(),
            status: MessageStatus::Sent,
        }
    }

    /// The write payload for this message.
    #[must_use]
    pub fn as_write(&self) -> MessageWrite {
        MessageWrite {
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            body: self.body.clone(),
            client_id: self.client_id,
        }
    }
}

/// Payload accepted by the backend write endpoint.
///
/// The backend enforces `client_id` uniqueness, which makes retried writes
/// idempotent end-to-end; this layer only supplies the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWrite {
    /// Target chat.
    pub chat_id: ChatId,
    /// Authoring user.
    pub sender_id: UserId,
    /// Message text.
    pub body: String,
    /// Idempotency token, reused verbatim on every retry.
    pub client_id: ClientId,
}

impl MessageWrite {
    /// Validates the write payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the body is empty or oversized.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_body(&self.body)
    }
}

/// Acknowledgment returned by the write endpoint for a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    /// Server-assigned row id.
    pub id: MessageId,
    /// Per-chat sequence number assigned at write time.
    pub seq: u64,
    /// Server-side creation timestamp.
    pub created_at: Timestamp,
}

/// A raw row-insert event pushed by the real-time channel.
///
/// Legacy rows may lack both `client_id` and `seq`; the orderer falls back
/// to `created_at` for those.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Server-assigned row id.
    pub id: MessageId,
    /// Which chat the row belongs to.
    pub chat_id: ChatId,
    /// Authoring user.
    pub sender_id: UserId,
    /// Message text.
    pub body: String,
    /// Idempotency token, if the writing client supplied one.
    pub client_id: Option<ClientId>,
    /// Per-chat sequence number, absent on unsequenced legacy rows.
    pub seq: Option<u64>,
    /// Server-side creation timestamp.
    pub created_at: Timestamp,
}

impl IncomingMessage {
    /// Converts the raw row into a canonical [`Message`] with the given
    /// delivery status.
    #[must_use]
    pub fn into_message(self, status: MessageStatus) -> Message {
        Message {
            id: Some(self.id),
            client_id: self.client_id.unwrap_or_default(),
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            body: self.body,
            seq: self.seq,
            created_at: self.created_at,
            status,
        }
    }
}
