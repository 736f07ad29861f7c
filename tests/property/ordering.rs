//! Property-based tests for the message orderer.
//!
//! Uses proptest to verify:
//! 1. Merging any feed of messages yields a list sorted under the
//!    delivery order, regardless of arrival order.
//! 2. Merging the same feed twice never grows the list (dedupe holds).
//! 3. Sequenced messages always precede unsequenced ones.
//! 4. The final order is independent of arrival order.

use proptest::prelude::*;

use driftchat::dedupe::{DedupeConfig, DedupeStore};
use driftchat::ordering::{delivery_order, merge_message};

use driftchat_proto::message::{
    ChatId, ClientId, Message, MessageId, MessageStatus, Timestamp, UserId,
};
use uuid::Uuid;

// --- Strategies ---

/// A message as it would arrive off the real-time channel: most rows
/// sequenced, some legacy rows without a seq.
fn arb_message() -> impl Strategy<Value = Message> {
    (
        0i64..i64::MAX,
        any::<u128>(),
        prop::option::of(0u64..10_000),
        0u64..1_000_000_000,
    )
        .prop_map(|(id, client, seq, created_at)| Message {
            id: Some(MessageId::new(id)),
            client_id: ClientId::from_uuid(Uuid::from_u128(client)),
            chat_id: ChatId::from_uuid(Uuid::from_u128(7)),
            sender_id: UserId::new(),
            body: "x".into(),
            seq,
            created_at: Timestamp::from_millis(created_at),
            status: MessageStatus::Delivered,
        })
}

fn arb_feed() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(arb_message(), 0..40)
}

fn fresh_store() -> DedupeStore {
    DedupeStore::new(DedupeConfig::default())
}

fn merge_all(feed: &[Message]) -> Vec<Message> {
    let store = fresh_store();
    let mut list = Vec::new();
    for message in feed {
        merge_message(&mut list, message.clone(), &store);
    }
    list
}

// --- Properties ---

proptest! {
    #[test]
    fn merged_list_is_sorted(feed in arb_feed()) {
        let list = merge_all(&feed);
        for pair in list.windows(2) {
            prop_assert_ne!(
                delivery_order(&pair[0], &pair[1]),
                std::cmp::Ordering::Greater
            );
        }
    }

    #[test]
    fn remerging_the_same_feed_never_grows_the_list(feed in arb_feed()) {
        let store = fresh_store();
        let mut list = Vec::new();
        for message in &feed {
            merge_message(&mut list, message.clone(), &store);
        }
        let len_after_first_pass = list.len();
        for message in &feed {
            merge_message(&mut list, message.clone(), &store);
        }
        prop_assert_eq!(list.len(), len_after_first_pass);
    }

    #[test]
    fn sequenced_messages_precede_unsequenced(feed in arb_feed()) {
        let list = merge_all(&feed);
        let first_unsequenced = list
            .iter()
            .position(|m| m.seq.is_none())
            .unwrap_or(list.len());
        for message in &list[first_unsequenced..] {
            prop_assert!(message.seq.is_none());
        }
    }

    #[test]
    fn final_order_is_independent_of_arrival_order(
        (feed, shuffled) in arb_feed().prop_flat_map(|feed| {
            let shuffled = Just(feed.clone()).prop_shuffle();
            (Just(feed), shuffled)
        })
    ) {
        let a = merge_all(&feed);
        let b = merge_all(&shuffled);
        let keys = |list: &[Message]| -> Vec<ClientId> {
            list.iter().map(|m| m.client_id).collect::<Vec<_>>()
        };
        prop_assert_eq!(keys(&a), keys(&b));
    }
}
