//! Grouphone signaling wire envelopes.
//!
//! Shared by the REST surface and the push channel so clients see one
//! consistent encoding:
//!
//! - REST success bodies: `{"message": ..., "payload": ...}`
//! - REST error bodies: `{"error": ..., "details": ..., "status": ...}`
//! - Push-channel frames: tagged `{"type": ..., "data": ...}` envelopes
//!
//! The payloads themselves stay opaque [`serde_json::Value`]s; this crate
//! only pins the envelope shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// REST success envelope.
///
/// `payload` is whatever the endpoint resolved to; for the message relay
/// endpoint it is the media subsystem's response, verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSuccess<T> {
    pub message: String,
    pub payload: T,
}

impl<T> ApiSuccess<T> {
    pub fn new(message: impl Into<String>, payload: T) -> Self {
        Self {
            message: message.into(),
            payload,
        }
    }
}

/// REST error envelope.
///
/// `details` carries structured context (e.g. the offending identifier),
/// never internal state. `status` repeats the HTTP status code so clients
/// reading the body alone can branch on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub error: String,
    pub details: Value,
    pub status: u16,
}

/// A frame on the push channel, in either direction.
///
/// Inbound, the relay accepts only [`PushFrame::RelayedMessage`]; every
/// other shape is logged and ignored. Outbound, the relay emits
/// [`PushFrame::MediaEvent`] for unsolicited media-subsystem events and
/// [`PushFrame::Closing`] before a server-initiated close.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PushFrame {
    /// A media-subsystem notification relayed from the far end.
    RelayedMessage(Value),
    /// An unsolicited media-subsystem event for this connection.
    MediaEvent(Value),
    /// Server-initiated close with an explanatory reason.
    Closing { reason: String },
}

/// Push-channel frame decode failure.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PushFrame {
    /// Decode a frame from its JSON text representation.
    pub fn decode(raw: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode a frame to its JSON text representation.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relayed_message_decodes_from_tagged_envelope() {
        let frame =
            PushFrame::decode(r#"{"type":"relayedMessage","data":{"method":"leave"}}"#).unwrap();
        assert_eq!(
            frame,
            PushFrame::RelayedMessage(json!({"method": "leave"}))
        );
    }

    #[test]
    fn media_event_encodes_with_type_tag() {
        let frame = PushFrame::MediaEvent(json!({"peer": "k1"}));
        let encoded = frame.encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "mediaEvent");
        assert_eq!(value["data"]["peer"], "k1");
    }

    #[test]
    fn closing_frame_round_trips() {
        let frame = PushFrame::Closing {
            reason: "call deleted".to_string(),
        };
        let decoded = PushFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(PushFrame::decode(r#"{"type":"bogus","data":{}}"#).is_err());
        assert!(PushFrame::decode("not json").is_err());
    }

    #[test]
    fn api_error_serializes_all_fields() {
        let err = ApiError {
            error: "Invalid connection ID".to_string(),
            details: json!({"connectionId": "bogus"}),
            status: 400,
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error"], "Invalid connection ID");
        assert_eq!(value["details"]["connectionId"], "bogus");
        assert_eq!(value["status"], 400);
    }
}
