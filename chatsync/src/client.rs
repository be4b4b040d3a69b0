//! Top-level engine facade.
//!
//! [`ChatClient`] wires the coordinator, stores, and trackers together and
//! exposes the surface a UI layer consumes: reactive read models plus the
//! imperative actions (`select_conversation`, `send_message`,
//! `load_more_messages`, `notify_typing`).
//!
//! Two background tasks run for the lifetime of the client: one routes
//! coordinator events into the stores, one relays locally-debounced typing
//! events out over the live connection. Both are aborted on drop.

use std::sync::Arc;

use tokio::sync::broadcast;

use chatsync_proto::event::ClientEvent;
use chatsync_proto::ids::{ContextId, ConversationId, MessageId, UserId};
use chatsync_proto::message::{Attachment, Conversation, Message, MessageDraft};

use crate::api::{ApiClient, ApiError, HttpApiClient, LoadError};
use crate::config::ChatSyncConfig;
use crate::conversations::ConversationRegistry;
use crate::coordinator::{
    ConnectionCoordinator, ConnectionState, CoordinatorError, CoordinatorEvent,
};
use crate::messages::{MessageStore, SendError};
use crate::presence::PresenceTracker;
use crate::session::CredentialProvider;
use crate::typing::TypingCoordinator;

/// The synchronization engine for one logged-in user.
///
/// Must be constructed inside a Tokio runtime; the event pump tasks are
/// spawned immediately.
pub struct ChatClient<A = HttpApiClient> {
    api: Arc<A>,
    coordinator: Arc<ConnectionCoordinator>,
    registry: Arc<ConversationRegistry<A>>,
    messages: Arc<MessageStore<A>>,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingCoordinator>,
    local_user: UserId,
    active: parking_lot::Mutex<Option<ConversationId>>,
    pumps: Vec<tokio::task::JoinHandle<()>>,
}

impl ChatClient<HttpApiClient> {
    /// Create a client over the production HTTP request client.
    #[must_use]
    pub fn new(
        config: ChatSyncConfig,
        credentials: Arc<dyn CredentialProvider>,
        local_user: UserId,
    ) -> Self {
        let api = Arc::new(HttpApiClient::new(
            config.api_base_url.clone(),
            Arc::clone(&credentials),
        ));
        Self::with_api(config, api, credentials, local_user)
    }
}

impl<A: ApiClient + 'static> ChatClient<A> {
    /// Create a client over a custom request client (used in tests).
    #[must_use]
    pub fn with_api(
        config: ChatSyncConfig,
        api: Arc<A>,
        credentials: Arc<dyn CredentialProvider>,
        local_user: UserId,
    ) -> Self {
        let coordinator = ConnectionCoordinator::new(config.coordinator, credentials);
        let registry = Arc::new(ConversationRegistry::new(Arc::clone(&api)));
        let messages = Arc::new(MessageStore::with_page_size(
            Arc::clone(&api),
            config.page_size,
        ));
        let presence = Arc::new(PresenceTracker::new());
        let (typing, typing_rx) = TypingCoordinator::new(local_user.clone(), config.typing);

        let event_pump = spawn_event_pump(
            coordinator.subscribe(),
            Arc::clone(&registry),
            Arc::clone(&messages),
            Arc::clone(&presence),
            Arc::clone(&typing),
        );
        let typing_pump = spawn_typing_pump(Arc::clone(&coordinator), typing_rx);

        Self {
            api,
            coordinator,
            registry,
            messages,
            presence,
            typing,
            local_user,
            active: parking_lot::Mutex::new(None),
            pumps: vec![event_pump, typing_pump],
        }
    }

    // -- Connection --

    /// Connect (or reuse the connection) for `context`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Channel`] if no channel could be opened.
    pub async fn connect(&self, context: ContextId) -> Result<(), CoordinatorError> {
        self.coordinator.connect(context).await
    }

    /// Tear the connection down. Presence and typing state are cleared;
    /// the conversation and message caches are kept for offline display.
    pub async fn disconnect(&self) {
        self.coordinator.disconnect().await;
        self.presence.clear();
        self.typing.clear();
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.coordinator.state()
    }

    /// Reason for the most recent transport failure, if any.
    #[must_use]
    pub fn connection_error(&self) -> Option<String> {
        self.coordinator.last_error()
    }

    /// Subscribe to the coordinator's event stream.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.coordinator.subscribe()
    }

    // -- Conversations --

    /// Load the conversation list for `context`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] on request failure; the previous list is kept.
    pub async fn load_conversations(&self, context: Option<&ContextId>) -> Result<(), LoadError> {
        self.registry.load(context).await
    }

    /// Snapshot of the cached conversation list.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.registry.conversations()
    }

    /// The conversation currently on screen.
    #[must_use]
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active.lock().clone()
    }

    /// Put `conversation` on screen: join its room, point typing at it,
    /// and fetch its most recent page. `None` clears the selection.
    ///
    /// Switching away discards any in-flight page for the previous
    /// conversation when it lands.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the initial page fetch fails. A failed
    /// room join is logged and not fatal; the join is retried on the next
    /// reconnect.
    pub async fn select_conversation(
        &self,
        conversation: Option<ConversationId>,
    ) -> Result<(), LoadError> {
        *self.active.lock() = conversation.clone();
        self.registry.set_active(conversation.clone());
        self.typing.set_conversation(conversation.clone());

        if let Some(id) = &conversation
            && let Err(e) = self.coordinator.join_conversation(id.clone()).await
        {
            tracing::warn!(conversation = %id, err = %e, "room join failed");
        }

        self.messages.set_conversation(conversation).await
    }

    // -- Messages --

    /// Messages of the active conversation, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages.messages()
    }

    /// Whether earlier history may exist for the active conversation.
    #[must_use]
    pub fn has_more_messages(&self) -> bool {
        self.messages.has_more()
    }

    /// Fetch the page preceding the oldest held message. No-op when there
    /// is no more history or a load is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the fetch fails; held messages are kept.
    pub async fn load_more_messages(&self) -> Result<(), LoadError> {
        self.messages.load_more().await
    }

    /// Send `draft` to the active conversation optimistically.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`]; on a network failure the placeholder stays
    /// in the list with status `failed` for [`retry_message`].
    ///
    /// [`retry_message`]: Self::retry_message
    pub async fn send_message(&self, draft: MessageDraft) -> Result<Message, SendError> {
        self.messages
            .send_optimistic(self.local_user.clone(), draft)
            .await
    }

    /// Retry a failed send.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotRetryable`] if `id` is not a failed
    /// message, or [`SendError::Api`] if the POST fails again.
    pub async fn retry_message(&self, id: &MessageId) -> Result<Message, SendError> {
        self.messages.retry(id).await
    }

    /// Upload a file for later attachment to a message.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the upload fails.
    pub async fn upload_attachment(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment, ApiError> {
        self.api.upload(file_name, mime_type, bytes).await
    }

    // -- Presence & typing --

    /// Whether `user` is currently online.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.presence.is_online(user)
    }

    /// Snapshot of all online user ids.
    #[must_use]
    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.presence.online_user_ids()
    }

    /// Record a local keystroke in the active conversation.
    pub fn notify_typing(&self) {
        self.typing.notify_typing();
    }

    /// Users currently typing in the active conversation.
    #[must_use]
    pub fn typing_user_ids(&self) -> Vec<UserId> {
        match self.active.lock().clone() {
            Some(conversation) => self.typing.remote_typing_users(&conversation),
            None => Vec::new(),
        }
    }
}

impl<A> Drop for ChatClient<A> {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

fn spawn_event_pump<A: ApiClient + 'static>(
    mut events: broadcast::Receiver<CoordinatorEvent>,
    registry: Arc<ConversationRegistry<A>>,
    messages: Arc<MessageStore<A>>,
    presence: Arc<PresenceTracker>,
    typing: Arc<TypingCoordinator>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::MessageReceived(message)) => {
                    registry.apply_incoming(&message);
                    messages.apply_incoming(message);
                }
                Ok(CoordinatorEvent::PresenceChanged { user_id, online }) => {
                    presence.apply(user_id, online);
                }
                Ok(CoordinatorEvent::TypingChanged(event)) => {
                    typing.apply_remote(event);
                }
                Ok(CoordinatorEvent::Disconnected) => {
                    presence.clear();
                    typing.clear();
                }
                Ok(CoordinatorEvent::Connected | CoordinatorEvent::Error(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event pump lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_typing_pump(
    coordinator: Arc<ConnectionCoordinator>,
    mut typing_rx: tokio::sync::mpsc::Receiver<ClientEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = typing_rx.recv().await {
            // Typing is best-effort; drop it when offline.
            if let Err(e) = coordinator.send(&event).await {
                tracing::debug!(err = %e, "typing event not relayed");
            }
        }
    })
}
