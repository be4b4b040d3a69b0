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

//! Connection lifecycle of the coordinator against a live in-test backend:
//! state transitions, idempotent connects, token attachment, join
//! buffering, and teardown.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chatsync::coordinator::{ConnectionCoordinator, ConnectionState, CoordinatorError};
use chatsync::session::SessionCredentials;
use chatsync_proto::ids::{ContextId, ConversationId};
use support::{TestBackend, fast_config, wait_until};

fn credentials(token: &str) -> Arc<SessionCredentials> {
    Arc::new(SessionCredentials::with_token(token))
}

#[tokio::test]
async fn connect_reaches_connected_and_attaches_token() {
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );

    assert_eq!(coordinator.state(), ConnectionState::Disconnected);
    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();
    assert_eq!(coordinator.state(), ConnectionState::Connected);

    wait_until(Duration::from_secs(2), "connection accepted", || {
        backend.connection_count() == 1
    })
    .await;
    assert_eq!(backend.tokens(), vec![Some("jwt-alice".to_string())]);
}

#[tokio::test]
async fn repeat_connect_is_idempotent() {
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );

    let context = ContextId::new("project-1");
    coordinator.connect(context.clone()).await.unwrap();
    coordinator.connect(context.clone()).await.unwrap();
    coordinator.connect(context).await.unwrap();

    // Give any (incorrect) extra dials time to land.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.connection_count(), 1);
}

#[tokio::test]
async fn concurrent_connects_open_one_channel() {
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );

    let first = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.connect(ContextId::new("project-1")).await }
    });
    let second = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.connect(ContextId::new("project-1")).await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.connection_count(), 1);
    assert_eq!(coordinator.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn connect_failure_lands_in_error_state() {
    // Nothing listens on this port.
    let coordinator = ConnectionCoordinator::new(
        fast_config("ws://127.0.0.1:9/socket", None),
        credentials("jwt-alice"),
    );

    let result = coordinator.connect(ContextId::new("project-1")).await;
    assert!(matches!(result, Err(CoordinatorError::Channel(_))));
    assert_eq!(coordinator.state(), ConnectionState::Error);
    assert!(coordinator.last_error().is_some());

    // A fresh connect from Error is allowed.
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );
    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();
    assert_eq!(coordinator.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn disconnect_is_safe_from_any_state() {
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );

    // Disconnect while already disconnected.
    coordinator.disconnect().await;
    assert_eq!(coordinator.state(), ConnectionState::Disconnected);

    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();
    coordinator.disconnect().await;
    assert_eq!(coordinator.state(), ConnectionState::Disconnected);
    assert!(coordinator.joined_conversation().is_none());
}

#[tokio::test]
async fn join_before_connect_is_buffered_and_flushed() {
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );

    // Join while disconnected: buffered, no error.
    coordinator
        .join_conversation(ConversationId::new("conv-1"))
        .await
        .unwrap();
    assert!(backend.joined_rooms().is_empty());

    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();

    wait_until(Duration::from_secs(2), "buffered join flushed", || {
        backend.joined_rooms() == vec!["conv-1".to_string()]
    })
    .await;
    assert_eq!(
        coordinator.joined_conversation(),
        Some(ConversationId::new("conv-1"))
    );
}

#[tokio::test]
async fn repeat_join_is_deduplicated() {
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );
    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();

    let conv = ConversationId::new("conv-1");
    coordinator.join_conversation(conv.clone()).await.unwrap();
    coordinator.join_conversation(conv.clone()).await.unwrap();
    coordinator.join_conversation(conv).await.unwrap();

    wait_until(Duration::from_secs(2), "join frame received", || {
        !backend.joined_rooms().is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.joined_rooms(), vec!["conv-1".to_string()]);
}

#[tokio::test]
async fn switching_conversations_joins_the_new_room() {
    let backend = TestBackend::start().await;
    let coordinator = ConnectionCoordinator::new(
        fast_config(&backend.url, None),
        credentials("jwt-alice"),
    );
    coordinator
        .connect(ContextId::new("project-1"))
        .await
        .unwrap();

    coordinator
        .join_conversation(ConversationId::new("conv-1"))
        .await
        .unwrap();
    coordinator
        .join_conversation(ConversationId::new("conv-2"))
        .await
        .unwrap();

    wait_until(Duration::from_secs(2), "both joins received", || {
        backend.joined_rooms().len() == 2
    })
    .await;
    assert_eq!(
        backend.joined_rooms(),
        vec!["conv-1".to_string(), "conv-2".to_string()]
    );
    assert_eq!(
        coordinator.joined_conversation(),
        Some(ConversationId::new("conv-2"))
    );
}

#[tokio::test]
async fn send_without_connection_fails_fast() {
    let coordinator = ConnectionCoordinator::new(
        fast_config("ws://127.0.0.1:9/socket", None),
        credentials("jwt-alice"),
    );

    let event = chatsync_proto::event::ClientEvent::JoinRoom {
        conversation_id: ConversationId::new("conv-1"),
    };
    let result = coordinator.send(&event).await;
    assert!(matches!(result, Err(CoordinatorError::NotConnected)));
}
