//! WebSocket transport channel for the synchronization engine.
//!
//! [`SocketChannel`] wraps a single live connection to the backend. It
//! authenticates at open time from an injected [`CredentialProvider`],
//! spawns a background reader task that decodes inbound frames, and runs
//! its own bounded reconnect-with-backoff when the connection drops
//! unexpectedly (never after an explicit [`SocketChannel::close`]).
//!
//! During the dual-transport migration two channel flavors coexist: the
//! structured event channel ([`EventCodec`]) and the legacy raw channel
//! ([`RawCodec`]). Both run through the same [`SocketChannel`]; only the
//! [`WireCodec`] differs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use chatsync_proto::codec::{self, CodecError};
use chatsync_proto::event::{ClientEvent, ServerEvent};
use chatsync_proto::message::Message;

use crate::session::CredentialProvider;

/// Type alias for the write half of a WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for opening a connection to the backend.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur during channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Opening the connection timed out.
    #[error("channel connect timed out")]
    Timeout,

    /// The backend URL cannot be resolved or connected.
    #[error("backend {0} is unreachable")]
    Unreachable(String),

    /// The server rejected the connection credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The connection is closed (explicitly or after reconnect gave up).
    #[error("channel closed")]
    Closed,

    /// Encoding or decoding a frame failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events emitted by a [`SocketChannel`] to its subscriber.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection was re-established after an unexpected drop.
    Opened,
    /// A decoded inbound event.
    Event(ServerEvent),
    /// The connection dropped unexpectedly; reconnection is in progress.
    Errored(String),
    /// The channel is done: explicitly closed or reconnect attempts
    /// exhausted. No further events follow.
    Closed,
}

/// Bounded reconnect policy: exponential backoff, capped delay, finite
/// attempts. Applies only to unexpected drops.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Attempts before giving up and emitting [`ChannelEvent::Closed`].
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on the per-attempt delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay before the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Translates between application events and wire frames.
///
/// `encode` returns `Ok(None)` for events the channel flavor does not
/// carry (they are skipped, not errors). `decode` returns `Ok(None)` for
/// frames to ignore.
pub trait WireCodec: Send + Sync {
    /// Encode an outbound event as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if serialization fails.
    fn encode(&self, event: &ClientEvent) -> Result<Option<String>, CodecError>;

    /// Decode an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the frame is malformed for this flavor.
    fn decode(&self, frame: &str) -> Result<Option<ServerEvent>, CodecError>;
}

/// Structured event channel codec: `{"event": "...", "data": {...}}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventCodec;

impl WireCodec for EventCodec {
    fn encode(&self, event: &ClientEvent) -> Result<Option<String>, CodecError> {
        codec::encode_client(event).map(Some)
    }

    fn decode(&self, frame: &str) -> Result<Option<ServerEvent>, CodecError> {
        codec::decode_server(frame).map(Some)
    }
}

/// Legacy raw channel codec: inbound frames are bare `Message` JSON;
/// outbound joins use the old `{"joinRoom": "<id>"}` shape and typing is
/// not carried at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl WireCodec for RawCodec {
    fn encode(&self, event: &ClientEvent) -> Result<Option<String>, CodecError> {
        match event {
            ClientEvent::JoinRoom { conversation_id } => {
                let frame = serde_json::json!({ "joinRoom": conversation_id });
                Ok(Some(frame.to_string()))
            }
            ClientEvent::Typing(_) => Ok(None),
        }
    }

    fn decode(&self, frame: &str) -> Result<Option<ServerEvent>, CodecError> {
        let message: Message = serde_json::from_str(frame)
            .map_err(|e| CodecError::Serialization(e.to_string()))?;
        Ok(Some(ServerEvent::Message(message)))
    }
}

/// State shared between the channel handle and its reader task.
struct ChannelShared {
    url: String,
    codec: Arc<dyn WireCodec>,
    credentials: Arc<dyn CredentialProvider>,
    policy: ReconnectPolicy,
    /// Write half of the current connection; `None` while disconnected.
    sink: Mutex<Option<WsSink>>,
    /// Whether a connection is currently live.
    connected: AtomicBool,
    /// Set by an explicit close; suppresses reconnection.
    closing: AtomicBool,
}

/// A single live connection to the backend.
///
/// Created via [`SocketChannel::open`], which dials, authenticates, and
/// spawns the background reader. Inbound events arrive on the returned
/// receiver; [`ChannelEvent::Closed`] is always the final event.
pub struct SocketChannel {
    shared: Arc<ChannelShared>,
    _reader: tokio::task::JoinHandle<()>,
}

impl SocketChannel {
    /// Open a connection and start the background reader.
    ///
    /// The session token from `credentials` is attached as a `token` query
    /// parameter at dial time; it is re-read on every reconnect attempt so
    /// a rotated token takes effect.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Timeout`] if the dial times out.
    /// - [`ChannelError::Unreachable`] if the URL cannot be connected.
    /// - [`ChannelError::Auth`] if the server rejects the handshake with
    ///   401/403.
    pub async fn open(
        url: &str,
        codec: Arc<dyn WireCodec>,
        credentials: Arc<dyn CredentialProvider>,
        policy: ReconnectPolicy,
        buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), ChannelError> {
        let stream = dial(url, credentials.as_ref()).await?;
        let (sink, reader) = stream.split();

        let shared = Arc::new(ChannelShared {
            url: url.to_string(),
            codec,
            credentials,
            policy,
            sink: Mutex::new(Some(sink)),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel(buffer);
        let reader_handle = tokio::spawn(run_reader(Arc::clone(&shared), reader, tx));

        Ok((
            Self {
                shared,
                _reader: reader_handle,
            },
            rx,
        ))
    }

    /// Send an application event over the live connection.
    ///
    /// Events the channel flavor does not carry are silently skipped.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Closed`] if no connection is live.
    /// - [`ChannelError::Codec`] if the event cannot be encoded.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        if !self.shared.connected.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed);
        }
        let Some(frame) = self.shared.codec.encode(event)? else {
            return Ok(());
        };

        let mut sink = self.shared.sink.lock().await;
        let Some(ws) = sink.as_mut() else {
            return Err(ChannelError::Closed);
        };
        ws.send(WsMessage::Text(frame.into())).await.map_err(|e| {
            tracing::warn!(url = %self.shared.url, err = %e, "channel send failed");
            self.shared.connected.store(false, Ordering::Relaxed);
            ChannelError::Closed
        })
    }

    /// Close the connection. The reader task emits a final
    /// [`ChannelEvent::Closed`] and does not reconnect.
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::Relaxed);
        self.shared.connected.store(false, Ordering::Relaxed);
        let mut sink = self.shared.sink.lock().await;
        if let Some(mut ws) = sink.take() {
            let _ = ws.send(WsMessage::Close(None)).await;
            let _ = ws.close().await;
        }
    }

    /// Whether a connection is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// The backend URL this channel dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }
}

/// Attach the session token (if any) as a query parameter.
fn authorized_url(url: &str, token: Option<&str>) -> Result<String, ChannelError> {
    let mut parsed =
        url::Url::parse(url).map_err(|_| ChannelError::Unreachable(url.to_string()))?;
    if let Some(token) = token {
        parsed.query_pairs_mut().append_pair("token", token);
    }
    Ok(parsed.to_string())
}

/// Dial the backend with the connect timeout, reading credentials fresh.
async fn dial(
    url: &str,
    credentials: &dyn CredentialProvider,
) -> Result<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, ChannelError> {
    let token = credentials.token();
    let target = authorized_url(url, token.as_deref())?;

    let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&target))
        .await
        .map_err(|_| {
            tracing::warn!(url, "channel connect timed out");
            ChannelError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url, err = %e, "channel connect failed");
            map_ws_connect_error(url, e)
        })?;

    Ok(stream)
}

/// Map a `tokio_tungstenite` connection error to a [`ChannelError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                ChannelError::Unreachable(url.to_string())
            } else {
                ChannelError::Io(io_err)
            }
        }
        WsError::Http(response) => {
            let status = response.status();
            if status == 401 || status == 403 {
                ChannelError::Auth(format!("handshake rejected with status {status}"))
            } else {
                ChannelError::Io(std::io::Error::other(format!(
                    "handshake HTTP error: status {status}"
                )))
            }
        }
        WsError::Tls(_) => ChannelError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        other => ChannelError::Io(std::io::Error::other(format!("connect error: {other}"))),
    }
}

/// Background task: read frames, decode, and reconnect on unexpected drops.
///
/// Malformed frames are logged and skipped, never fatal. When the stream
/// ends without an explicit close, the task emits `Errored`, runs the
/// bounded backoff loop, and either resumes (emitting `Opened`) or gives
/// up (emitting `Closed`).
async fn run_reader(
    shared: Arc<ChannelShared>,
    mut reader: WsReader,
    tx: mpsc::Sender<ChannelEvent>,
) {
    'connection: loop {
        while let Some(result) = reader.next().await {
            match result {
                Ok(WsMessage::Text(frame)) => match shared.codec.decode(frame.as_str()) {
                    Ok(Some(event)) => {
                        if tx.send(ChannelEvent::Event(event)).await.is_err() {
                            // Subscriber dropped; the channel is abandoned.
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(url = %shared.url, err = %e, "malformed frame, skipping");
                    }
                },
                Ok(WsMessage::Close(_)) => {
                    tracing::info!(url = %shared.url, "channel closed by server");
                    break;
                }
                Ok(_) => {
                    // Binary/ping/pong frames are not part of the contract.
                }
                Err(e) => {
                    tracing::warn!(url = %shared.url, err = %e, "channel read error");
                    break;
                }
            }
        }

        shared.connected.store(false, Ordering::Relaxed);
        shared.sink.lock().await.take();

        if shared.closing.load(Ordering::Relaxed) {
            let _ = tx.send(ChannelEvent::Closed).await;
            return;
        }

        let _ = tx
            .send(ChannelEvent::Errored("connection lost".into()))
            .await;

        for attempt in 1..=shared.policy.max_attempts {
            tokio::time::sleep(shared.policy.delay_for(attempt)).await;
            if shared.closing.load(Ordering::Relaxed) {
                let _ = tx.send(ChannelEvent::Closed).await;
                return;
            }

            match dial(&shared.url, shared.credentials.as_ref()).await {
                Ok(stream) => {
                    let (sink, new_reader) = stream.split();
                    *shared.sink.lock().await = Some(sink);
                    shared.connected.store(true, Ordering::Relaxed);
                    reader = new_reader;
                    tracing::info!(url = %shared.url, attempt, "channel reconnected");
                    if tx.send(ChannelEvent::Opened).await.is_err() {
                        return;
                    }
                    continue 'connection;
                }
                Err(e) => {
                    tracing::warn!(
                        url = %shared.url,
                        attempt,
                        max_attempts = shared.policy.max_attempts,
                        err = %e,
                        "reconnect attempt failed"
                    );
                }
            }
        }

        tracing::warn!(url = %shared.url, "reconnect attempts exhausted");
        let _ = tx.send(ChannelEvent::Closed).await;
        return;
    }
}
