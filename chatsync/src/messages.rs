//! Per-conversation message cache.
//!
//! Holds the ordered message history for the selected conversation, pages
//! backwards through older history with the oldest held message id as the
//! cursor, and books optimistic sends: a placeholder goes in immediately
//! and is replaced in place once the server confirms, or marked failed
//! and kept for retry.
//!
//! Every mutation is all-or-nothing: a failed load or send never leaves
//! the cache half-updated. Responses for a conversation that is no longer
//! selected are discarded on arrival, guarded by an epoch counter bumped
//! on every conversation switch.

use std::sync::Arc;

use parking_lot::RwLock;

use chatsync_proto::ids::{ConversationId, MessageId, UserId};
use chatsync_proto::message::{Message, MessageDraft, MessageStatus, Timestamp, ValidationError};

use crate::api::{ApiClient, ApiError, LoadError, parse_list};

/// Messages fetched per page. Fewer than this in a response means no
/// earlier history (heuristic; the backend sends no explicit flag).
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Errors from sending a message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The draft failed validation; nothing was enqueued.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The POST failed; the placeholder is kept with status `failed`.
    #[error("send failed: {0}")]
    Api(#[from] ApiError),

    /// Retry was asked for an id that is not a failed message in the store.
    #[error("no failed message with id {0}")]
    NotRetryable(MessageId),
}

#[derive(Debug, Default)]
struct StoreState {
    conversation: Option<ConversationId>,
    messages: Vec<Message>,
    has_more: bool,
    loading: bool,
    error: Option<String>,
    /// Bumped on every conversation switch; in-flight loads compare
    /// against it at completion and discard on mismatch.
    epoch: u64,
}

/// Ordered message cache for the currently-selected conversation.
pub struct MessageStore<A> {
    api: Arc<A>,
    page_size: usize,
    state: RwLock<StoreState>,
}

impl<A: ApiClient> MessageStore<A> {
    /// Create an empty store with the default page size.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        Self::with_page_size(api, DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store with a custom page size.
    #[must_use]
    pub fn with_page_size(api: Arc<A>, page_size: usize) -> Self {
        Self {
            api,
            page_size,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Snapshot of the held messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.state.read().messages.clone()
    }

    /// The conversation this store currently targets.
    #[must_use]
    pub fn conversation(&self) -> Option<ConversationId> {
        self.state.read().conversation.clone()
    }

    /// Whether earlier history may exist.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.state.read().has_more
    }

    /// Whether a page load is in flight.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.state.read().loading
    }

    /// The last load failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.read().error.clone()
    }

    /// Switch to `conversation` (or to nothing) and fetch its most recent
    /// page.
    ///
    /// Clears the cache immediately. If a response for a previously
    /// selected conversation arrives after the switch it is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the initial page fetch fails; the store
    /// then holds an empty list with the error recorded as state.
    pub async fn set_conversation(
        &self,
        conversation: Option<ConversationId>,
    ) -> Result<(), LoadError> {
        let epoch = {
            let mut state = self.state.write();
            state.epoch += 1;
            state.conversation = conversation.clone();
            state.messages.clear();
            state.has_more = false;
            state.loading = conversation.is_some();
            state.error = None;
            state.epoch
        };

        let Some(conversation) = conversation else {
            return Ok(());
        };

        let result = self.fetch_page(&conversation, None).await;
        self.apply_page(epoch, result, false)
    }

    /// Fetch the page immediately preceding the oldest held message.
    ///
    /// No-op when `has_more` is false or a load is already in flight;
    /// re-entrant calls are ignored, not queued.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the fetch fails; held messages are
    /// unaffected.
    pub async fn load_more(&self) -> Result<(), LoadError> {
        let (epoch, conversation, cursor) = {
            let mut state = self.state.write();
            if !state.has_more || state.loading {
                return Ok(());
            }
            let Some(conversation) = state.conversation.clone() else {
                return Ok(());
            };
            let Some(oldest) = state.messages.first().map(|m| m.id.clone()) else {
                return Ok(());
            };
            state.loading = true;
            (state.epoch, conversation, oldest)
        };

        let result = self.fetch_page(&conversation, Some(&cursor)).await;
        self.apply_page(epoch, result, true)
    }

    /// Append a placeholder and POST the draft.
    ///
    /// The placeholder appears immediately with status `sending` and a
    /// locally-minted id. On success it is replaced in place by the
    /// confirmed message; on failure its status flips to `failed` and it
    /// stays put so the UI can offer retry.
    ///
    /// # Errors
    ///
    /// [`SendError::Validation`] if the draft is invalid (nothing is
    /// enqueued), [`SendError::Api`] if the POST fails.
    pub async fn send_optimistic(
        &self,
        sender: UserId,
        draft: MessageDraft,
    ) -> Result<Message, SendError> {
        draft.validate()?;

        let (conversation, placeholder_id) = {
            let mut state = self.state.write();
            let Some(conversation) = state.conversation.clone() else {
                return Err(SendError::Validation(ValidationError::Empty));
            };
            let placeholder = Message {
                id: MessageId::local(),
                conversation_id: conversation.clone(),
                sender_id: sender,
                content: draft.content.clone(),
                kind: draft.kind,
                attachments: draft.attachments.clone(),
                timestamp: Timestamp::now(),
                status: MessageStatus::Sending,
            };
            let id = placeholder.id.clone();
            state.messages.push(placeholder);
            (conversation, id)
        };

        self.post_and_settle(&conversation, &placeholder_id, &draft)
            .await
    }

    /// Retry a failed send.
    ///
    /// Flips the failed placeholder back to `sending` and re-POSTs its
    /// content.
    ///
    /// # Errors
    ///
    /// [`SendError::NotRetryable`] if `id` is not a failed message in this
    /// store; [`SendError::Api`] if the POST fails again.
    pub async fn retry(&self, id: &MessageId) -> Result<Message, SendError> {
        let (conversation, draft) = {
            let mut state = self.state.write();
            let conversation = state
                .conversation
                .clone()
                .ok_or_else(|| SendError::NotRetryable(id.clone()))?;
            let message = state
                .messages
                .iter_mut()
                .find(|m| &m.id == id && m.status == MessageStatus::Failed)
                .ok_or_else(|| SendError::NotRetryable(id.clone()))?;
            message.advance_status(MessageStatus::Sending);
            let draft = MessageDraft {
                content: message.content.clone(),
                kind: message.kind,
                attachments: message.attachments.clone(),
            };
            (conversation, draft)
        };

        self.post_and_settle(&conversation, id, &draft).await
    }

    /// Fold an inbound real-time message into the cache.
    ///
    /// Ignored when it targets a different conversation or its id is
    /// already held; otherwise inserted in timestamp order.
    pub fn apply_incoming(&self, message: Message) {
        let mut state = self.state.write();
        if state.conversation.as_ref() != Some(&message.conversation_id) {
            return;
        }
        if state.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        insert_sorted(&mut state.messages, message);
    }

    async fn fetch_page(
        &self,
        conversation: &ConversationId,
        before: Option<&MessageId>,
    ) -> Result<Vec<Message>, LoadError> {
        let raw = self
            .api
            .fetch_messages(conversation, before, self.page_size)
            .await?;
        parse_list::<Message>(raw)
    }

    /// Commit a completed page fetch, unless the store has moved on.
    fn apply_page(
        &self,
        epoch: u64,
        result: Result<Vec<Message>, LoadError>,
        prepend: bool,
    ) -> Result<(), LoadError> {
        let mut state = self.state.write();
        if state.epoch != epoch {
            tracing::debug!("discarding page for abandoned conversation");
            return Ok(());
        }
        state.loading = false;
        match result {
            Ok(page) => {
                // Boundary heuristic: a short page means no earlier history.
                state.has_more = page.len() == self.page_size;
                if prepend {
                    let fresh: Vec<Message> = page
                        .into_iter()
                        .filter(|m| !state.messages.iter().any(|held| held.id == m.id))
                        .collect();
                    state.messages.splice(0..0, fresh);
                } else {
                    // Messages that landed while the fetch was in flight
                    // (live events, optimistic placeholders) are folded
                    // back in rather than clobbered by the page.
                    let held = std::mem::replace(&mut state.messages, page);
                    for message in held {
                        if !state.messages.iter().any(|m| m.id == message.id) {
                            insert_sorted(&mut state.messages, message);
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(conversation = ?state.conversation, err = %e, "page load failed");
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn post_and_settle(
        &self,
        conversation: &ConversationId,
        placeholder_id: &MessageId,
        draft: &MessageDraft,
    ) -> Result<Message, SendError> {
        match self.api.post_message(conversation, draft).await {
            Ok(mut confirmed) => {
                confirmed.advance_status(MessageStatus::Sent);
                let mut state = self.state.write();
                if let Some(slot) = state
                    .messages
                    .iter_mut()
                    .find(|m| &m.id == placeholder_id)
                {
                    *slot = confirmed.clone();
                }
                Ok(confirmed)
            }
            Err(e) => {
                let mut state = self.state.write();
                if let Some(slot) = state
                    .messages
                    .iter_mut()
                    .find(|m| &m.id == placeholder_id)
                {
                    slot.advance_status(MessageStatus::Failed);
                }
                drop(state);
                tracing::warn!(err = %e, "message send failed");
                Err(e.into())
            }
        }
    }
}

/// Insert keeping non-decreasing timestamp order; ties go after existing
/// entries so arrival order is preserved.
fn insert_sorted(messages: &mut Vec<Message>, message: Message) {
    let position = messages
        .iter()
        .rposition(|m| m.timestamp <= message.timestamp)
        .map_or(0, |i| i + 1);
    messages.insert(position, message);
}
