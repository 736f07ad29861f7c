//! Backend seam for the hosted write endpoint.
//!
//! Defines the [`WriteEndpoint`] trait the delivery layer sends through,
//! plus the [`WriteError`] taxonomy that drives retry classification.
//! Concrete implementations include:
//! - [`memory::InMemoryBackend`] — in-process backend for tests and demos
//! - the production HTTP client over the hosted service (separate crate)

pub mod memory;

use driftchat_proto::message::{MessageWrite, WriteAck};

/// Errors surfaced by the write endpoint.
///
/// The retry layer classifies each variant as transient or permanent; see
/// [`crate::retry::classify`]. Variants carry strings rather than source
/// errors so outcomes can be cloned into queue reports and UI events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The request timed out before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// DNS resolution failed for the backend host.
    #[error("dns resolution failed: {0}")]
    Dns(String),

    /// The connection dropped mid-request.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The client is known to be offline; no round trip was attempted.
    #[error("client is offline")]
    Offline,

    /// The backend answered with a non-success HTTP status.
    #[error("http {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The session token is invalid or expired; the user must re-authenticate.
    #[error("auth token expired or invalid: {0}")]
    AuthExpired(String),

    /// The caller is not allowed to write to this chat.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend rejected the payload as malformed.
    #[error("validation rejected: {0}")]
    Validation(String),

    /// Anything the transport could not classify.
    #[error("{0}")]
    Other(String),
}

/// Async seam over the hosted backend's message-insert endpoint.
///
/// Accepts `(chat_id, sender_id, body, client_id)` and returns the
/// server-assigned row id and per-chat sequence number. The backend
/// enforces `client_id` uniqueness, so replaying a write with the same
/// token must yield the original acknowledgment rather than a second row.
pub trait WriteEndpoint: Send + Sync {
    /// Persist one message, returning its server-assigned identity.
    fn insert_message(
        &self,
        write: &MessageWrite,
    ) -> impl std::future::Future<Output = Result<WriteAck, WriteError>> + Send;
}
