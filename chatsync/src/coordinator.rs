//! Connection coordinator: single owner of the live channel(s).
//!
//! [`ConnectionCoordinator`] owns one or two [`SocketChannel`]s per active
//! context, deduplicates redundant connects, merges inbound events from
//! both channels into one outward stream (suppressing duplicate messages
//! by id), and exposes the connection state machine to the UI layer.
//!
//! During the transport migration a structured event channel and a legacy
//! raw channel run side by side; both are driven through the same contract
//! here. Stores never open channels themselves — they subscribe to this
//! coordinator's event stream.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use chatsync_proto::event::{ClientEvent, ServerEvent, TypingEvent};
use chatsync_proto::ids::{ContextId, ConversationId, MessageId, UserId};
use chatsync_proto::message::Message;

use crate::session::CredentialProvider;
use crate::transport::{
    ChannelError, ChannelEvent, EventCodec, RawCodec, ReconnectPolicy, SocketChannel, WireCodec,
};

/// Maximum size of the duplicate-suppression set before eviction.
const MAX_DEDUP_TRACKING: usize = 10_000;

/// Connection lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channels open.
    Disconnected,
    /// `connect` is in flight.
    Connecting,
    /// At least one channel is live.
    Connected,
    /// The last `connect` failed; a fresh `connect` is required.
    Error,
}

/// Events the coordinator emits to its subscribers.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// The connection is (re-)established.
    Connected,
    /// All channels are gone.
    Disconnected,
    /// A transient transport error; the channels keep retrying.
    Error(String),
    /// A user's presence changed.
    PresenceChanged {
        /// The user whose presence changed.
        user_id: UserId,
        /// `true` for online, `false` for offline.
        online: bool,
    },
    /// A message arrived on a joined room (already deduplicated).
    MessageReceived(Message),
    /// A remote user's typing state changed.
    TypingChanged(TypingEvent),
}

/// Errors from coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A send was attempted with no live channel. Never retried here.
    #[error("not connected")]
    NotConnected,

    /// The underlying channel failed to open.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Connection endpoints and tuning for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Structured event channel URL.
    pub socket_url: String,
    /// Legacy raw channel URL; `None` once the migration completes.
    pub legacy_socket_url: Option<String>,
    /// Reconnect policy handed to each channel.
    pub reconnect: ReconnectPolicy,
    /// Buffer size for channel and subscriber event streams.
    pub event_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://127.0.0.1:4000/socket".into(),
            legacy_socket_url: None,
            reconnect: ReconnectPolicy::default(),
            event_buffer: 256,
        }
    }
}

struct Inner {
    state: ConnectionState,
    last_error: Option<String>,
    context: Option<ContextId>,
    channels: Vec<Arc<SocketChannel>>,
    pumps: Vec<tokio::task::JoinHandle<()>>,
    /// Currently joined conversation, at most one.
    joined: Option<ConversationId>,
    /// Join requested before the connection was up; flushed on connect.
    pending_join: Option<ConversationId>,
    /// Message ids already delivered, for cross-channel duplicate
    /// suppression.
    seen: HashSet<MessageId>,
    /// Channels that have not yet emitted their final `Closed`.
    open_channels: usize,
    /// Bumped on every connect/disconnect so stale pump tasks no-op.
    epoch: u64,
}

/// Sole owner of the live connection(s) for one context.
pub struct ConnectionCoordinator {
    config: CoordinatorConfig,
    credentials: Arc<dyn CredentialProvider>,
    events: broadcast::Sender<CoordinatorEvent>,
    inner: Mutex<Inner>,
}

impl ConnectionCoordinator {
    /// Create a coordinator. No connection is opened until
    /// [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: CoordinatorConfig, credentials: Arc<dyn CredentialProvider>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_buffer);
        Arc::new(Self {
            config,
            credentials,
            events,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                last_error: None,
                context: None,
                channels: Vec::new(),
                pumps: Vec::new(),
                joined: None,
                pending_join: None,
                seen: HashSet::new(),
                open_channels: 0,
                epoch: 0,
            }),
        })
    }

    /// Subscribe to the outward event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Reason for the most recent transport failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// The conversation currently joined, if any.
    #[must_use]
    pub fn joined_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().joined.clone()
    }

    /// Whether at least one channel is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Establish (or reuse) the connection(s) for `context`.
    ///
    /// Idempotent: a repeat call for the same context while connecting or
    /// connected is a no-op. A call for a different context tears the old
    /// connection down first.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Channel`] if the structured channel
    /// cannot be opened; the coordinator then sits in
    /// [`ConnectionState::Error`] until the next `connect`.
    pub async fn connect(self: &Arc<Self>, context: ContextId) -> Result<(), CoordinatorError> {
        let needs_teardown = {
            let inner = self.inner.lock();
            matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) && inner.context.as_ref() != Some(&context)
        };
        if needs_teardown {
            self.disconnect().await;
        }

        let epoch = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) && inner.context.as_ref() == Some(&context)
            {
                return Ok(());
            }
            inner.state = ConnectionState::Connecting;
            inner.context = Some(context);
            inner.last_error = None;
            inner.epoch += 1;
            inner.epoch
        };

        // Structured event channel is mandatory.
        if let Err(e) = self
            .open_channel(&self.config.socket_url, Arc::new(EventCodec), epoch)
            .await
        {
            let mut inner = self.inner.lock();
            if inner.epoch == epoch {
                inner.state = ConnectionState::Error;
                inner.last_error = Some(e.to_string());
            }
            drop(inner);
            let _ = self.events.send(CoordinatorEvent::Error(e.to_string()));
            return Err(e.into());
        }

        // Legacy raw channel is best-effort during the migration window.
        if let Some(legacy_url) = self.config.legacy_socket_url.clone() {
            if let Err(e) = self.open_channel(&legacy_url, Arc::new(RawCodec), epoch).await {
                tracing::warn!(url = %legacy_url, err = %e, "legacy channel unavailable");
            }
        }

        let join_now = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                // A disconnect raced the connect; the channels were already
                // handed to the old epoch's teardown.
                return Ok(());
            }
            inner.state = ConnectionState::Connected;
            if let Some(id) = inner.pending_join.take() {
                inner.joined = Some(id.clone());
                Some(id)
            } else {
                None
            }
        };

        let _ = self.events.send(CoordinatorEvent::Connected);

        if let Some(id) = join_now {
            self.join_on_channels(&id).await?;
        }
        Ok(())
    }

    /// Tear down all channels. Safe from any state; always ends in
    /// [`ConnectionState::Disconnected`].
    pub async fn disconnect(&self) {
        let (channels, pumps, was_disconnected) = {
            let mut inner = self.inner.lock();
            let was = inner.state == ConnectionState::Disconnected && inner.channels.is_empty();
            inner.state = ConnectionState::Disconnected;
            inner.epoch += 1;
            inner.context = None;
            inner.joined = None;
            inner.pending_join = None;
            inner.last_error = None;
            inner.seen.clear();
            inner.open_channels = 0;
            (
                std::mem::take(&mut inner.channels),
                std::mem::take(&mut inner.pumps),
                was,
            )
        };

        for channel in &channels {
            channel.close().await;
        }
        for pump in pumps {
            pump.abort();
        }

        if !was_disconnected {
            let _ = self.events.send(CoordinatorEvent::Disconnected);
        }
    }

    /// Subscribe to a conversation's room.
    ///
    /// Safe before the connection is up (buffered and flushed once
    /// connected); a no-op when already joined to that conversation.
    /// Joining a different conversation implicitly leaves the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotConnected`] if connected channels all
    /// refuse the join frame.
    pub async fn join_conversation(
        self: &Arc<Self>,
        conversation: ConversationId,
    ) -> Result<(), CoordinatorError> {
        let send_now = {
            let mut inner = self.inner.lock();
            if inner.joined.as_ref() == Some(&conversation)
                || inner.pending_join.as_ref() == Some(&conversation)
            {
                return Ok(());
            }
            if inner.state == ConnectionState::Connected {
                inner.joined = Some(conversation.clone());
                inner.pending_join = None;
                true
            } else {
                inner.pending_join = Some(conversation.clone());
                false
            }
        };

        if send_now {
            self.join_on_channels(&conversation).await?;
        }
        Ok(())
    }

    /// Relay an application event over whichever channel is live.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotConnected`] if no channel accepts the
    /// event; the caller decides whether to retry.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), CoordinatorError> {
        let channels = {
            let inner = self.inner.lock();
            if inner.state != ConnectionState::Connected {
                return Err(CoordinatorError::NotConnected);
            }
            inner.channels.clone()
        };

        for channel in &channels {
            match channel.send(event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(url = channel.url(), err = %e, "channel refused send");
                }
            }
        }
        Err(CoordinatorError::NotConnected)
    }

    /// Open one channel and register its pump task.
    async fn open_channel(
        self: &Arc<Self>,
        url: &str,
        codec: Arc<dyn WireCodec>,
        epoch: u64,
    ) -> Result<(), ChannelError> {
        let (channel, rx) = SocketChannel::open(
            url,
            codec,
            Arc::clone(&self.credentials),
            self.config.reconnect,
            self.config.event_buffer,
        )
        .await?;
        let channel = Arc::new(channel);

        let stale = {
            let mut inner = self.inner.lock();
            if inner.epoch == epoch {
                inner.channels.push(Arc::clone(&channel));
                inner.open_channels += 1;
                let pump = self.spawn_pump(rx, epoch);
                inner.pumps.push(pump);
                false
            } else {
                true
            }
        };

        if stale {
            // A disconnect raced us; this channel was never registered.
            channel.close().await;
        }
        Ok(())
    }

    fn spawn_pump(
        self: &Arc<Self>,
        mut rx: tokio::sync::mpsc::Receiver<ChannelEvent>,
        epoch: u64,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                this.handle_channel_event(event, epoch).await;
            }
        })
    }

    /// Send the join frame on every channel; at least one must take it.
    async fn join_on_channels(&self, conversation: &ConversationId) -> Result<(), CoordinatorError> {
        let channels = self.inner.lock().channels.clone();
        let event = ClientEvent::JoinRoom {
            conversation_id: conversation.clone(),
        };

        let mut delivered = false;
        for channel in &channels {
            match channel.send(&event).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    tracing::warn!(url = channel.url(), err = %e, "join not sent on channel");
                }
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(CoordinatorError::NotConnected)
        }
    }

    async fn handle_channel_event(self: &Arc<Self>, event: ChannelEvent, epoch: u64) {
        match event {
            ChannelEvent::Event(ServerEvent::Message(message)) => {
                {
                    let mut inner = self.inner.lock();
                    if inner.epoch != epoch {
                        return;
                    }
                    if inner.seen.contains(&message.id) {
                        tracing::debug!(message_id = %message.id, "duplicate message dropped");
                        return;
                    }
                    if inner.seen.len() >= MAX_DEDUP_TRACKING {
                        inner.seen.clear();
                    }
                    inner.seen.insert(message.id.clone());
                }
                let _ = self.events.send(CoordinatorEvent::MessageReceived(message));
            }
            ChannelEvent::Event(ServerEvent::UserOnline { user_id }) => {
                if self.epoch_current(epoch) {
                    let _ = self.events.send(CoordinatorEvent::PresenceChanged {
                        user_id,
                        online: true,
                    });
                }
            }
            ChannelEvent::Event(ServerEvent::UserOffline { user_id }) => {
                if self.epoch_current(epoch) {
                    let _ = self.events.send(CoordinatorEvent::PresenceChanged {
                        user_id,
                        online: false,
                    });
                }
            }
            ChannelEvent::Event(ServerEvent::Typing(typing)) => {
                if self.epoch_current(epoch) {
                    let _ = self.events.send(CoordinatorEvent::TypingChanged(typing));
                }
            }
            ChannelEvent::Opened => {
                // A channel came back after its own backoff loop.
                let rejoin = {
                    let mut inner = self.inner.lock();
                    if inner.epoch != epoch {
                        return;
                    }
                    inner.state = ConnectionState::Connected;
                    inner.last_error = None;
                    if let Some(id) = inner.pending_join.take() {
                        inner.joined = Some(id);
                    }
                    inner.joined.clone()
                };
                let _ = self.events.send(CoordinatorEvent::Connected);
                if let Some(id) = rejoin
                    && let Err(e) = self.join_on_channels(&id).await
                {
                    tracing::warn!(conversation = %id, err = %e, "re-join after reconnect failed");
                }
            }
            ChannelEvent::Errored(reason) => {
                {
                    let mut inner = self.inner.lock();
                    if inner.epoch != epoch {
                        return;
                    }
                    inner.last_error = Some(reason.clone());
                }
                let _ = self.events.send(CoordinatorEvent::Error(reason));
            }
            ChannelEvent::Closed => {
                let all_gone = {
                    let mut inner = self.inner.lock();
                    if inner.epoch != epoch {
                        return;
                    }
                    inner.open_channels = inner.open_channels.saturating_sub(1);
                    if inner.open_channels == 0 {
                        inner.state = ConnectionState::Disconnected;
                        true
                    } else {
                        false
                    }
                };
                if all_gone {
                    let _ = self.events.send(CoordinatorEvent::Disconnected);
                }
            }
        }
    }

    fn epoch_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }
}
