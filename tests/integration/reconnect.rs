// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Reconnection behavior: automatic bounded backoff after an unexpected
//! drop, automatic re-join of the selected conversation, and the terminal
//! disconnect when attempts are exhausted.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chatsync::coordinator::{ConnectionCoordinator, ConnectionState, CoordinatorEvent};
use chatsync::session::SessionCredentials;
use chatsync_proto::ids::{ContextId, ConversationId};
use support::{TestBackend, fast_config, wait_for_event, wait_until};

fn credentials() -> Arc<SessionCredentials> {
    Arc::new(SessionCredentials::with_token("jwt-alice"))
}

#[tokio::test]
async fn channel_reconnects_after_unexpected_drop() {
    let backend = TestBackend::start().await;
    let coordinator =
        ConnectionCoordinator::new(fast_config(&backend.url, None), credentials());
    let mut events = coordinator.subscribe();

    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();
    assert_eq!(backend.connection_count(), 1);

    backend.drop_connections();

    // The drop surfaces as a transient error, then the channel comes back.
    wait_for_event(&mut events, Duration::from_secs(5), "transient error", |e| {
        matches!(e, CoordinatorEvent::Error(_))
    })
    .await;
    wait_for_event(&mut events, Duration::from_secs(5), "reconnected", |e| {
        matches!(e, CoordinatorEvent::Connected)
    })
    .await;

    assert_eq!(coordinator.state(), ConnectionState::Connected);
    assert_eq!(backend.connection_count(), 2);
}

#[tokio::test]
async fn selected_conversation_is_rejoined_after_reconnect() {
    let backend = TestBackend::start().await;
    let coordinator =
        ConnectionCoordinator::new(fast_config(&backend.url, None), credentials());
    let mut events = coordinator.subscribe();

    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();
    coordinator
        .join_conversation(ConversationId::new("conv-1"))
        .await
        .unwrap();
    wait_until(Duration::from_secs(2), "initial join received", || {
        backend.joined_rooms().len() == 1
    })
    .await;

    backend.drop_connections();
    wait_for_event(&mut events, Duration::from_secs(5), "reconnected", |e| {
        matches!(e, CoordinatorEvent::Connected)
    })
    .await;

    // The same room is joined again on the new connection, unprompted.
    wait_until(Duration::from_secs(2), "automatic re-join", || {
        backend.joined_rooms() == vec!["conv-1".to_string(), "conv-1".to_string()]
    })
    .await;
    assert_eq!(
        coordinator.joined_conversation(),
        Some(ConversationId::new("conv-1"))
    );
}

#[tokio::test]
async fn exhausted_reconnect_ends_disconnected() {
    let backend = TestBackend::start().await;
    let coordinator =
        ConnectionCoordinator::new(fast_config(&backend.url, None), credentials());
    let mut events = coordinator.subscribe();

    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();

    // Kill the backend entirely so every reconnect attempt fails.
    backend.shutdown();

    wait_for_event(
        &mut events,
        Duration::from_secs(10),
        "terminal disconnect",
        |e| matches!(e, CoordinatorEvent::Disconnected),
    )
    .await;
    assert_eq!(coordinator.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn explicit_disconnect_does_not_reconnect() {
    let backend = TestBackend::start().await;
    let coordinator =
        ConnectionCoordinator::new(fast_config(&backend.url, None), credentials());

    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();
    coordinator.disconnect().await;

    // Long enough for any (incorrect) backoff loop to have re-dialed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(backend.connection_count(), 1);
    assert_eq!(coordinator.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn rotated_token_is_used_on_reconnect() {
    let backend = TestBackend::start().await;
    let creds = Arc::new(SessionCredentials::with_token("jwt-old"));
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        Arc::clone(&creds) as Arc<dyn chatsync::session::CredentialProvider>,
    );
    let mut events = coordinator.subscribe();

    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();

    // Rotate the session token, then force a reconnect.
    creds.set_token("jwt-new");
    backend.drop_connections();

    // Drain the transient error first so the Connected matched below is the
    // reconnect's, not the initial one still buffered in the receiver.
    wait_for_event(&mut events, Duration::from_secs(5), "transient error", |e| {
        matches!(e, CoordinatorEvent::Error(_))
    })
    .await;
    wait_for_event(&mut events, Duration::from_secs(5), "reconnected", |e| {
        matches!(e, CoordinatorEvent::Connected)
    })
    .await;
    wait_until(Duration::from_secs(2), "second handshake recorded", || {
        backend.tokens().len() == 2
    })
    .await;

    assert_eq!(
        backend.tokens(),
        vec![Some("jwt-old".to_string()), Some("jwt-new".to_string())]
    );
}
