//! JSON encoding and decoding for the `PairChat` wire protocol.
//!
//! Frames travel as WebSocket text messages containing a single JSON
//! object; every payload on this surface is JSON-object-shaped.

use crate::wire::{ClientMessage, ServerMessage};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`ClientMessage`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_client(msg: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientMessage`] from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the text is not a valid frame.
pub fn decode_client(text: &str) -> Result<ClientMessage, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ServerMessage`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_server(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ServerMessage`] from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the text is not a valid frame.
pub fn decode_server(text: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}
