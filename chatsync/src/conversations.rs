//! Conversation list for a context.
//!
//! Loads conversation summaries over the request client and caches them.
//! A reload replaces the cache atomically; a failed reload keeps the
//! previous list and surfaces the error as state. Inbound messages bump
//! per-conversation previews and unread counts.

use std::sync::Arc;

use parking_lot::RwLock;

use chatsync_proto::ids::{ContextId, ConversationId};
use chatsync_proto::message::{Conversation, Message};

use crate::api::{ApiClient, LoadError, parse_list};

#[derive(Debug, Default)]
struct RegistryState {
    conversations: Vec<Conversation>,
    loading: bool,
    error: Option<String>,
    /// Conversation whose messages are on screen; inbound messages for it
    /// do not count as unread.
    active: Option<ConversationId>,
}

/// Cached conversation list with loading/error state.
pub struct ConversationRegistry<A> {
    api: Arc<A>,
    state: RwLock<RegistryState>,
}

impl<A: ApiClient> ConversationRegistry<A> {
    /// Create an empty registry over the given request client.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Fetch the conversation list for `context` and replace the cache.
    ///
    /// The swap is atomic: observers see either the old list or the new
    /// one, never a partial mix. Re-entrant calls while a load is in
    /// flight are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] on request failure or an unrecognized
    /// response shape; the previous cache is retained and the error is
    /// also recorded as state.
    pub async fn load(&self, context: Option<&ContextId>) -> Result<(), LoadError> {
        {
            let mut state = self.state.write();
            if state.loading {
                return Ok(());
            }
            state.loading = true;
            state.error = None;
        }

        let result = async {
            let raw = self.api.fetch_conversations(context).await?;
            parse_list::<Conversation>(raw)
        }
        .await;

        let mut state = self.state.write();
        state.loading = false;
        match result {
            Ok(conversations) => {
                state.conversations = conversations;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(err = %e, "conversation load failed");
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Snapshot of the cached conversation list.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.read().conversations.clone()
    }

    /// Look up one conversation by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.state
            .read()
            .conversations
            .iter()
            .find(|c| &c.id == id)
            .cloned()
    }

    /// Whether a load is in flight.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.state.read().loading
    }

    /// The last load failure, if the most recent load failed.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// Mark `id` as the conversation on screen and reset its unread count.
    pub fn set_active(&self, id: Option<ConversationId>) {
        let mut state = self.state.write();
        if let Some(id) = &id
            && let Some(conv) = state.conversations.iter_mut().find(|c| &c.id == id)
        {
            conv.unread_count = 0;
        }
        state.active = id;
    }

    /// Fold an inbound message into the summaries: update the preview and
    /// bump the unread count unless the conversation is on screen.
    pub fn apply_incoming(&self, message: &Message) {
        let mut state = self.state.write();
        let is_active = state.active.as_ref() == Some(&message.conversation_id);
        if let Some(conv) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        {
            conv.last_message = Some(message.clone());
            if !is_active {
                conv.unread_count += 1;
            }
        }
    }
}
