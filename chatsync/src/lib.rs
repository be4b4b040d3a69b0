//! `ChatSync` — client-side real-time chat synchronization engine.
//!
//! Maintains a live connection to the messaging backend, tracks
//! per-conversation history with cursor pagination and optimistic sends,
//! and exposes presence and typing state for a UI layer to observe.

pub mod api;
pub mod client;
pub mod config;
pub mod conversations;
pub mod coordinator;
pub mod messages;
pub mod presence;
pub mod session;
pub mod transport;
pub mod typing;
