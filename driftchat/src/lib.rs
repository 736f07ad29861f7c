//! Driftchat — message delivery reliability layer.
//!
//! Guarantees that a chat message sent by the user is never duplicated on
//! the receiving end, is merged into a stable causal order, is retried with
//! backoff while the network is flaky or the client is offline, and is
//! never retried once a failure is known to be permanent.

pub mod backend;
pub mod connectivity;
pub mod dedupe;
pub mod delivery;
pub mod ordering;
pub mod outbox;
pub mod retry;
