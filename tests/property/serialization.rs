//! Property-based serialization tests for the protocol types.
//!
//! Uses proptest to verify:
//! 1. Any valid `Message` survives a serialize → deserialize round-trip.
//! 2. Any valid `ClientEvent`/`ServerEvent` frame round-trips through the
//!    codec.
//! 3. Arbitrary text never causes a panic in `decode_server` (returns
//!    `Err` gracefully).
//! 4. Inbound messages without a `status` field default to `sent`.

use proptest::prelude::*;

use chatsync_proto::codec;
use chatsync_proto::event::{ClientEvent, ServerEvent, TypingEvent};
use chatsync_proto::ids::{ConversationId, MessageId, UserId};
use chatsync_proto::message::{
    Attachment, Message, MessageKind, MessageStatus, Timestamp,
};

// --- Strategies for protocol types ---

/// Strategy for id-like opaque strings (no control characters).
fn arb_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,32}"
}

fn arb_message_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sending),
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
        Just(MessageStatus::Failed),
    ]
}

fn arb_message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Text),
        Just(MessageKind::Image),
        Just(MessageKind::File),
    ]
}

fn arb_attachment() -> impl Strategy<Value = Attachment> {
    (arb_id(), arb_id(), arb_id(), any::<u64>(), arb_id()).prop_map(
        |(id, url, name, size, mime_type)| Attachment {
            id,
            url,
            name,
            size,
            mime_type,
        },
    )
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        arb_id(),
        arb_id(),
        arb_id(),
        "[^\u{0}]{0,256}",
        arb_message_kind(),
        prop::collection::vec(arb_attachment(), 0..3),
        any::<u64>(),
        arb_message_status(),
    )
        .prop_map(
            |(id, conversation, sender, content, kind, attachments, millis, status)| Message {
                id: MessageId::new(id),
                conversation_id: ConversationId::new(conversation),
                sender_id: UserId::new(sender),
                content,
                kind,
                attachments,
                timestamp: Timestamp::from_millis(millis),
                status,
            },
        )
}

fn arb_typing_event() -> impl Strategy<Value = TypingEvent> {
    (arb_id(), arb_id(), any::<bool>()).prop_map(|(conversation, user, is_typing)| TypingEvent {
        conversation_id: ConversationId::new(conversation),
        user_id: UserId::new(user),
        is_typing,
    })
}

fn arb_client_event() -> impl Strategy<Value = ClientEvent> {
    prop_oneof![
        arb_id().prop_map(|id| ClientEvent::JoinRoom {
            conversation_id: ConversationId::new(id)
        }),
        arb_typing_event().prop_map(ClientEvent::Typing),
    ]
}

fn arb_server_event() -> impl Strategy<Value = ServerEvent> {
    prop_oneof![
        arb_message().prop_map(ServerEvent::Message),
        arb_id().prop_map(|id| ServerEvent::UserOnline {
            user_id: UserId::new(id)
        }),
        arb_id().prop_map(|id| ServerEvent::UserOffline {
            user_id: UserId::new(id)
        }),
        arb_typing_event().prop_map(ServerEvent::Typing),
    ]
}

// --- Properties ---

proptest! {
    #[test]
    fn message_round_trips_through_json(message in arb_message()) {
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, message);
    }

    #[test]
    fn client_event_round_trips_through_codec(event in arb_client_event()) {
        let frame = codec::encode_client(&event).unwrap();
        // The frame is always a tagged envelope.
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        prop_assert!(value.get("event").is_some());
        let back: ClientEvent = serde_json::from_str(&frame).unwrap();
        prop_assert_eq!(back, event);
    }

    #[test]
    fn server_event_round_trips_through_codec(event in arb_server_event()) {
        let frame = serde_json::to_string(&event).unwrap();
        let back = codec::decode_server(&frame).unwrap();
        prop_assert_eq!(back, event);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_text(frame in ".{0,256}") {
        // Malformed frames must fail with an error, never a panic.
        let _ = codec::decode_server(&frame);
    }

    #[test]
    fn inbound_message_without_status_defaults_to_sent(
        id in arb_id(),
        conversation in arb_id(),
        sender in arb_id(),
        millis in any::<u64>(),
    ) {
        let json = serde_json::json!({
            "id": id,
            "conversationId": conversation,
            "senderId": sender,
            "content": "hello",
            "timestamp": millis,
        });
        let message: Message = serde_json::from_value(json).unwrap();
        prop_assert_eq!(message.status, MessageStatus::Sent);
    }
}
