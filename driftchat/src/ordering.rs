//! Stable causal ordering for a chat's message list.
//!
//! The primary key is the backend-assigned per-chat sequence number; the
//! `created_at` timestamp is the fallback for legacy rows that never got
//! one. When exactly one of a compared pair is sequenced, the sequenced
//! message sorts first, so the list is effectively partitioned into
//! "sequenced, by seq" followed by "unsequenced, by time". True
//! interleaving of legacy rows is deliberately not attempted; fixing that
//! needs a seq backfill migration outside this layer.

use std::cmp::Ordering;

use driftchat_proto::message::{ClientId, Message, MessageId};

use crate::dedupe::DedupeStore;

/// Dedupe key for a server-assigned row id.
#[must_use]
pub fn id_key(id: MessageId) -> String {
    format!("id:{id}")
}

/// Dedupe key for a client-generated idempotency token.
#[must_use]
pub fn client_key(client_id: ClientId) -> String {
    format!("client:{client_id}")
}

/// Total order over messages in one chat.
///
/// Ties on equal `seq` or equal fallback timestamp break by `client_id`
/// so the order is deterministic regardless of arrival order.
#[must_use]
pub fn delivery_order(a: &Message, b: &Message) -> Ordering {
    match (a.seq, b.seq) {
        (Some(sa), Some(sb)) => sa
            .cmp(&sb)
            .then_with(|| a.client_id.as_uuid().cmp(b.client_id.as_uuid())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.client_id.as_uuid().cmp(b.client_id.as_uuid())),
    }
}

/// Result of merging one incoming message into the ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The message was new and inserted at this position.
    Inserted(usize),
    /// The message was already seen (by id or client token) and discarded.
    Duplicate,
}

/// Merges `incoming` into the ordered `list`, collapsing duplicates.
///
/// The dedupe store is consulted by server id and by client token before
/// insertion; on a hit the message is discarded. On insertion both
/// identifiers are registered so the at-least-once real-time channel and
/// optimistic local inserts can never double up.
pub fn merge_message(
    list: &mut Vec<Message>,
    incoming: Message,
    dedupe: &DedupeStore,
) -> MergeOutcome {
    let ckey = client_key(incoming.client_id);
    if dedupe.contains(&ckey) {
        tracing::debug!(client_id = %incoming.client_id, "duplicate by client token, dropped");
        return MergeOutcome::Duplicate;
    }
    if let Some(id) = incoming.id {
        let ikey = id_key(id);
        if dedupe.contains(&ikey) {
            tracing::debug!(message_id = %id, "duplicate by server id, dropped");
            return MergeOutcome::Duplicate;
        }
        dedupe.insert(ikey);
    }
    dedupe.insert(ckey);

    let position = insertion_point(list, &incoming);
    list.insert(position, incoming);
    MergeOutcome::Inserted(position)
}

/// First index at which `message` can be inserted while keeping `list`
/// sorted under [`delivery_order`].
#[must_use]
pub fn insertion_point(list: &[Message], message: &Message) -> usize {
    list.partition_point(|existing| delivery_order(existing, message) != Ordering::Greater)
}
