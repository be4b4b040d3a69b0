//! Typing-indicator coordination.
//!
//! Local side: coalesces per-keystroke [`notify_typing`] calls into at
//! most one "typing started" broadcast per burst and exactly one "typing
//! stopped" once input has been idle for the reset window.
//!
//! Remote side: tracks which users are typing per conversation, fed by
//! inbound typing events, and independently expires entries whose stop
//! event never arrives so the indicator cannot get stuck.
//!
//! [`notify_typing`]: TypingCoordinator::notify_typing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use chatsync_proto::event::{ClientEvent, TypingEvent};
use chatsync_proto::ids::{ConversationId, UserId};

/// Timing knobs for the typing coordinator.
#[derive(Debug, Clone, Copy)]
pub struct TypingConfig {
    /// Idle time after the last keystroke before "stopped" goes out.
    pub idle_window: Duration,
    /// How long a remote typing entry lives without a stop event.
    pub remote_expiry: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_millis(1000),
            remote_expiry: Duration::from_millis(5000),
        }
    }
}

struct TypingInner {
    conversation: Option<ConversationId>,
    /// Whether a "started" broadcast is outstanding (no "stopped" yet).
    typing: bool,
    /// Bumped on every keystroke; the idle watcher fires only if no
    /// later keystroke superseded it.
    burst: u64,
    remote: HashMap<ConversationId, HashMap<UserId, Instant>>,
}

/// Debounces local typing signals and tracks remote typing state.
pub struct TypingCoordinator {
    config: TypingConfig,
    local_user: UserId,
    outbound: mpsc::Sender<ClientEvent>,
    inner: Mutex<TypingInner>,
}

impl TypingCoordinator {
    /// Create a coordinator for `local_user`.
    ///
    /// Returns the coordinator and the stream of typing events to relay
    /// over the live connection.
    #[must_use]
    pub fn new(local_user: UserId, config: TypingConfig) -> (Arc<Self>, mpsc::Receiver<ClientEvent>) {
        let (outbound, rx) = mpsc::channel(32);
        let coordinator = Arc::new(Self {
            config,
            local_user,
            outbound,
            inner: Mutex::new(TypingInner {
                conversation: None,
                typing: false,
                burst: 0,
                remote: HashMap::new(),
            }),
        });
        (coordinator, rx)
    }

    /// Point local typing at `conversation`.
    ///
    /// An outstanding "started" for the previous conversation is closed
    /// with a "stopped" broadcast first.
    pub fn set_conversation(&self, conversation: Option<ConversationId>) {
        let stop_previous = {
            let mut inner = self.inner.lock();
            let previous = if inner.typing {
                inner.conversation.clone()
            } else {
                None
            };
            inner.typing = false;
            inner.burst += 1;
            inner.conversation = conversation;
            previous
        };
        if let Some(previous) = stop_previous {
            self.broadcast(previous, false);
        }
    }

    /// Record a local keystroke.
    ///
    /// The first keystroke of a burst broadcasts "typing started"; every
    /// keystroke restarts the idle timer; the timer expiring broadcasts
    /// "typing stopped" exactly once.
    pub fn notify_typing(self: &Arc<Self>) {
        let (emit_start, conversation, token) = {
            let mut inner = self.inner.lock();
            let Some(conversation) = inner.conversation.clone() else {
                return;
            };
            inner.burst += 1;
            let emit_start = !inner.typing;
            inner.typing = true;
            (emit_start, conversation, inner.burst)
        };

        if emit_start {
            self.broadcast(conversation.clone(), true);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.config.idle_window).await;
            let emit_stop = {
                let mut inner = this.inner.lock();
                // Superseded by a later keystroke or a conversation switch.
                if inner.burst != token || !inner.typing {
                    false
                } else {
                    inner.typing = false;
                    true
                }
            };
            if emit_stop {
                this.broadcast(conversation, false);
            }
        });
    }

    /// Fold an inbound typing event into the remote state.
    pub fn apply_remote(&self, event: TypingEvent) {
        // Our own echoes are not remote typing.
        if event.user_id == self.local_user {
            return;
        }
        let mut inner = self.inner.lock();
        let entry = inner.remote.entry(event.conversation_id).or_default();
        if event.is_typing {
            entry.insert(event.user_id, Instant::now());
        } else {
            entry.remove(&event.user_id);
        }
    }

    /// Users currently typing in `conversation`, stale entries pruned.
    #[must_use]
    pub fn remote_typing_users(&self, conversation: &ConversationId) -> Vec<UserId> {
        let mut inner = self.inner.lock();
        let expiry = self.config.remote_expiry;
        let Some(entries) = inner.remote.get_mut(conversation) else {
            return Vec::new();
        };
        entries.retain(|_, since| since.elapsed() < expiry);
        entries.keys().cloned().collect()
    }

    /// Forget all typing state (call on disconnect).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.remote.clear();
        inner.typing = false;
        inner.burst += 1;
    }

    fn broadcast(&self, conversation: ConversationId, is_typing: bool) {
        let event = ClientEvent::Typing(TypingEvent {
            conversation_id: conversation,
            user_id: self.local_user.clone(),
            is_typing,
        });
        if let Err(e) = self.outbound.try_send(event) {
            tracing::warn!(err = %e, "typing broadcast dropped");
        }
    }
}
