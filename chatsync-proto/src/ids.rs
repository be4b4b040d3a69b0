//! Identifier newtypes for the `ChatSync` protocol.
//!
//! All identifiers are server-assigned opaque strings as they appear in the
//! backend's JSON. Message ids are the one exception: the client mints a
//! temporary `local-` prefixed id for optimistic sends, which is replaced by
//! the server-assigned id on confirmation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a user (participant) in the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a new user identifier from a string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this user ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation (direct thread or project room).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Create a new conversation identifier from a string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this conversation ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefix used for client-minted placeholder message ids.
const LOCAL_ID_PREFIX: &str = "local-";

/// Identifies a message.
///
/// Either server-assigned or, for in-flight optimistic sends, a locally
/// unique placeholder created via [`MessageId::local`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message identifier from a server-assigned string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a locally unique placeholder id (UUID v7 for time-ordering).
    #[must_use]
    pub fn local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Whether this id is a client-minted placeholder.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    /// Return the string representation of this message ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the context (e.g. a project) that scopes a set of conversations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Create a new context identifier from a string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the string representation of this context ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
