// ============================
// crates/backend-lib/src/validation.rs
// ============================
//! Inbound message decoding and validation.
use crate::error::RelayError;
use roomcast_common::ClientMessage;
use serde_json::Value;

/// Decode one inbound text frame.
///
/// The frame must be a JSON object whose `type` names a known message.
/// Fields the message does not use are ignored.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, RelayError> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("type").and_then(Value::as_str) {
        None => return Err(RelayError::MissingType),
        Some(tag) if !ClientMessage::is_known_type(tag) => {
            return Err(RelayError::UnknownType(tag.to_string()))
        },
        Some(_) => {},
    }
    Ok(serde_json::from_value(value)?)
}

/// Check the fields of a decoded message
pub fn validate_client_message(msg: &ClientMessage, max_room_id_len: usize) -> Result<(), RelayError> {
    match msg {
        ClientMessage::JoinRoom { room_id } => validate_room_id(room_id, max_room_id_len),
        ClientMessage::StreamUpdated => Ok(()),
    }
}

fn validate_room_id(room_id: &str, max_len: usize) -> Result<(), RelayError> {
    if room_id.is_empty() {
        return Err(RelayError::InvalidRoomId("room id must not be empty".to_string()));
    }
    if room_id.len() > max_len {
        return Err(RelayError::InvalidRoomId(format!(
            "room id is {} bytes, limit is {max_len}",
            room_id.len()
        )));
    }
    Ok(())
}
