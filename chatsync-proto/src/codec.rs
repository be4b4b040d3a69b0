//! JSON encode/decode for the `ChatSync` real-time channel.
//!
//! The backend speaks JSON text frames over WebSocket, so the codec is a
//! thin `serde_json` wrapper that keeps the error surface uniform.

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`ClientEvent`] into a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ServerEvent`] from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be deserialized.
pub fn decode_server(frame: &str) -> Result<ServerEvent, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}
