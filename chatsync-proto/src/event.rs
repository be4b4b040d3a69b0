//! Real-time channel events.
//!
//! The structured socket carries JSON text frames of the shape
//! `{"event": "<name>", "data": {...}}`. Event names match the backend
//! contract: `join_room`, `message`, `user_online`, `user_offline`, `typing`.

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, UserId};
use crate::message::Message;

/// A typing indicator payload, used in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    /// The conversation where typing is occurring.
    pub conversation_id: ConversationId,
    /// The user who is typing (or stopped typing).
    pub user_id: UserId,
    /// Whether the user is currently typing (`true`) or stopped (`false`).
    pub is_typing: bool,
}

/// Events sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to a conversation's room.
    JoinRoom {
        /// The conversation to join.
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    /// Local typing state changed.
    Typing(TypingEvent),
}

/// Events received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new message in a joined room.
    Message(Message),
    /// A user came online.
    UserOnline {
        /// The user whose presence changed.
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    /// A user went offline.
    UserOffline {
        /// The user whose presence changed.
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    /// A remote user's typing state changed.
    Typing(TypingEvent),
}
