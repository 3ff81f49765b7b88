//! JSON text-frame codec for the push channel.
//!
//! Frames are `{"event": <name>, "data": {...}}`. Decoding an event first
//! peeks at the name so that server events outside [`KNOWN_EVENTS`] are
//! skipped instead of reported as errors.

use serde::Deserialize;

use crate::event::{KNOWN_EVENTS, PushCommand, PushEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The frame has no `event` name.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Just enough of a frame to route it by name.
#[derive(Deserialize)]
struct FrameHeader {
    event: Option<String>,
}

/// Returns the event name of a frame without decoding its payload.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if `text` is not a JSON object, or
/// [`CodecError::InvalidFrame`] if it has no string `event` field.
pub fn event_name(text: &str) -> Result<String, CodecError> {
    let header: FrameHeader = serde_json::from_str(text)?;
    header
        .event
        .ok_or_else(|| CodecError::InvalidFrame("missing event name".into()))
}

/// Encodes a [`PushCommand`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the command cannot be serialized.
pub fn encode_command(command: &PushCommand) -> Result<String, CodecError> {
    Ok(serde_json::to_string(command)?)
}

/// Decodes a JSON text frame into a [`PushCommand`].
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame is not a known command.
pub fn decode_command(text: &str) -> Result<PushCommand, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes a [`PushEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_event(event: &PushEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a JSON text frame into a [`PushEvent`].
///
/// Returns `Ok(None)` for well-formed frames whose event name is not
/// tracked.
///
/// # Errors
///
/// Returns [`CodecError`] if the frame is malformed or a known event has an
/// invalid payload.
pub fn decode_event(text: &str) -> Result<Option<PushEvent>, CodecError> {
    let name = event_name(text)?;
    if !KNOWN_EVENTS.contains(&name.as_str()) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(text)?))
}
