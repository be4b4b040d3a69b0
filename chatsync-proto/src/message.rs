//! Message, conversation, and attachment types for the `ChatSync` protocol.
//!
//! These mirror the backend's JSON representation (camelCase fields). They
//! are shared between the HTTP request client and the real-time channel.

use serde::{Deserialize, Serialize};

use crate::ids::{ContextId, ConversationId, MessageId, UserId};

/// Maximum allowed message text size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Millisecond-precision UTC timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
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

/// Kind of message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// An image with attachments carrying the image data URL.
    Image,
    /// A generic file with attachments carrying the download URL.
    File,
}

/// Delivery lifecycle of a message.
///
/// Status only moves forward; see [`MessageStatus::can_advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistic placeholder, network call in flight.
    Sending,
    /// Accepted by the server.
    Sent,
    /// Delivered to the recipient's client.
    Delivered,
    /// Read by the recipient.
    Read,
    /// The network call failed; the placeholder is retained for retry.
    Failed,
}

impl MessageStatus {
    /// Position of this status on the delivery ladder.
    const fn rank(self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            // Failed sits outside the ladder; see can_advance_to.
            Self::Failed => 0,
        }
    }

    /// Whether a transition from `self` to `next` is a forward move.
    ///
    /// `Failed` is only reachable from `Sending` (a failed optimistic send);
    /// a failed placeholder may go back to `Sending` on retry. All other
    /// transitions must strictly climb the ladder.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Sending, Self::Failed) | (Self::Failed, Self::Sending) => true,
            (_, Self::Failed) | (Self::Failed, _) => false,
            (from, to) => to.rank() > from.rank(),
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
            Self::Delivered => write!(f, "delivered"),
            Self::Read => write!(f, "read"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An uploaded file referenced by a message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Server-assigned attachment id.
    pub id: String,
    /// Download URL.
    pub url: String,
    /// Original file name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type (e.g. `image/png`).
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// A chat message as held by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id, or a `local-` placeholder while sending.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent it.
    pub sender_id: UserId,
    /// The message text (may be empty for pure attachment messages).
    pub content: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Attached files, possibly empty.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Creation time; non-decreasing within a conversation.
    pub timestamp: Timestamp,
    /// Delivery status. Inbound messages arrive at `Sent` or higher.
    #[serde(default = "default_inbound_status")]
    pub status: MessageStatus,
}

const fn default_inbound_status() -> MessageStatus {
    MessageStatus::Sent
}

impl Message {
    /// Advance the delivery status, ignoring regressions.
    pub fn advance_status(&mut self, next: MessageStatus) {
        if self.status.can_advance_to(next) {
            self.status = next;
        }
    }
}

/// Error returned when a draft fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Draft has neither text nor attachments.
    #[error("message is empty")]
    Empty,
    /// Message text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// An outgoing message before the server has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    /// The message text.
    pub content: String,
    /// Content kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Previously uploaded attachments to reference.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl MessageDraft {
    /// Creates a plain text draft with no attachments.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            attachments: Vec::new(),
        }
    }

    /// Validates this draft for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if there is no text and no
    /// attachment, or [`ValidationError::TooLarge`] if the text exceeds
    /// [`MAX_MESSAGE_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.is_empty() && self.attachments.is_empty() {
            return Err(ValidationError::Empty);
        }
        if self.content.len() > MAX_MESSAGE_SIZE {
            return Err(ValidationError::TooLarge {
                size: self.content.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

/// A conversation participant. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// The participant's user id.
    pub id: UserId,
    /// Name to show in the UI.
    pub display_name: String,
}

/// A conversation summary as returned by the registry endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Stable unique id.
    pub id: ConversationId,
    /// Participants, unique by id.
    pub participants: Vec<Participant>,
    /// Most recent message, if any.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Number of unread messages.
    #[serde(default)]
    pub unread_count: u32,
    /// Owning project scope; `None` for direct messages.
    #[serde(default)]
    pub context_id: Option<ContextId>,
}
