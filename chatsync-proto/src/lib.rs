//! `ChatSync` — wire types for the client synchronization protocol.

pub mod codec;
pub mod event;
pub mod ids;
pub mod message;
