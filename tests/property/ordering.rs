//! Property-based tests for message-cache ordering invariants.
//!
//! Uses proptest to verify that for any interleaving of paged history and
//! live inbound messages, the cache stays sorted by non-decreasing
//! timestamp and never holds two messages with the same id.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{Value, json};

use chatsync::api::{ApiClient, ApiError};
use chatsync::messages::MessageStore;
use chatsync_proto::ids::{ContextId, ConversationId, MessageId, UserId};
use chatsync_proto::message::{
    Attachment, Message, MessageDraft, MessageKind, MessageStatus, Timestamp,
};

/// Serves pre-computed message pages, newest page first.
struct PagedApi {
    pages: Mutex<Vec<Value>>,
}

impl ApiClient for PagedApi {
    async fn fetch_conversations(&self, _context: Option<&ContextId>) -> Result<Value, ApiError> {
        unreachable!("not used")
    }

    async fn fetch_messages(
        &self,
        _conversation: &ConversationId,
        _before: Option<&MessageId>,
        _limit: usize,
    ) -> Result<Value, ApiError> {
        let mut pages = self.pages.lock();
        if pages.is_empty() {
            Ok(json!([]))
        } else {
            Ok(pages.remove(0))
        }
    }

    async fn post_message(
        &self,
        _conversation: &ConversationId,
        _draft: &MessageDraft,
    ) -> Result<Message, ApiError> {
        unreachable!("not used")
    }

    async fn upload(
        &self,
        _file_name: &str,
        _mime_type: &str,
        _bytes: Vec<u8>,
    ) -> Result<Attachment, ApiError> {
        unreachable!("not used")
    }
}

fn page_json(ids: &[usize]) -> Value {
    let items: Vec<Value> = ids
        .iter()
        .map(|i| {
            json!({
                "id": format!("msg-{i:06}"),
                "conversationId": "conv-1",
                "senderId": "alice",
                "content": format!("message {i}"),
                "timestamp": 1_000_000_u64 + *i as u64,
            })
        })
        .collect();
    json!(items)
}

fn live_message(i: usize, millis: u64) -> Message {
    Message {
        id: MessageId::new(format!("live-{i:06}")),
        conversation_id: ConversationId::new("conv-1"),
        sender_id: UserId::new("bob"),
        content: format!("live {i}"),
        kind: MessageKind::Text,
        attachments: Vec::new(),
        timestamp: Timestamp::from_millis(millis),
        status: MessageStatus::Sent,
    }
}

fn assert_sorted_and_unique(messages: &[Message]) -> Result<(), TestCaseError> {
    for pair in messages.windows(2) {
        prop_assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "cache out of order: {} after {}",
            pair[0].timestamp,
            pair[1].timestamp
        );
    }
    let mut ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    ids.sort_unstable();
    let before = ids.len();
    ids.dedup();
    prop_assert_eq!(before, ids.len(), "cache holds duplicate ids");
    Ok(())
}

proptest! {
    /// Any number of pagination rounds keeps the cache sorted and
    /// duplicate-free, even when pages overlap at the boundary.
    #[test]
    fn pagination_preserves_order_and_uniqueness(
        page_size in 1usize..8,
        page_count in 1usize..6,
        overlap in 0usize..2,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let total = page_size * page_count;
            // Newest page first; each older page may repeat the boundary id.
            let mut pages = Vec::new();
            for p in 0..page_count {
                let hi = total - p * page_size;
                let lo = hi.saturating_sub(page_size + if p > 0 { overlap } else { 0 });
                let ids: Vec<usize> = (lo..hi).collect();
                pages.push(page_json(&ids));
            }

            let api = Arc::new(PagedApi { pages: Mutex::new(pages) });
            let store = MessageStore::with_page_size(api, page_size);
            store
                .set_conversation(Some(ConversationId::new("conv-1")))
                .await
                .unwrap();
            while store.has_more() {
                store.load_more().await.unwrap();
            }

            assert_sorted_and_unique(&store.messages())
        })?;
    }

    /// Live messages interleaved with pagination land in timestamp order
    /// without duplicating paged ids.
    #[test]
    fn live_inserts_keep_order(
        timestamps in prop::collection::vec(999_990u64..1_000_030, 0..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let ids: Vec<usize> = (0..10).collect();
            let api = Arc::new(PagedApi {
                pages: Mutex::new(vec![page_json(&ids)]),
            });
            let store = MessageStore::with_page_size(api, 20);
            store
                .set_conversation(Some(ConversationId::new("conv-1")))
                .await
                .unwrap();

            for (i, millis) in timestamps.iter().enumerate() {
                store.apply_incoming(live_message(i, *millis));
            }
            // Replays of already-held live ids change nothing.
            if let Some(millis) = timestamps.first() {
                store.apply_incoming(live_message(0, *millis));
            }

            let messages = store.messages();
            prop_assert_eq!(messages.len(), 10 + timestamps.len());
            assert_sorted_and_unique(&messages)
        })?;
    }
}
