//! Signaling wire format.
//!
//! One JSON object per WebSocket text frame, discriminated by `type`.
//! Unrecognized types parse into [`SignalMessage::Unknown`] so newer clients
//! do not break older servers; absent optional fields are treated as empty.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// Client requests admission to a room.
    Join { room: String, client_id: String },

    /// SDP offer, in either direction.
    Offer { sdp: String },

    /// SDP answer, in either direction.
    Answer { sdp: String },

    /// Trickle ICE candidate, in either direction.
    Candidate { candidate: String },

    /// Server notification: another peer entered the room.
    PeerJoined { client_id: String },

    /// Server notification: another peer departed.
    PeerLeft { client_id: String },

    /// Opportunistic screenshot forwarding. Clients send `target_id`; the
    /// server rewrites the envelope to carry the sender's `client_id`.
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default)]
        data: String,
    },

    /// Forward-compatibility catch-all; ignored on receipt.
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    /// Parse a single frame. Messages with an unrecognized `type` succeed as
    /// [`SignalMessage::Unknown`]; messages missing required fields fail.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_round_trips() {
        let msg = SignalMessage::Join {
            room: "r1".into(),
            client_id: "alice".into(),
        };
        let json = msg.to_json().unwrap();
        assert_eq!(SignalMessage::parse(&json).unwrap(), msg);
        assert!(json.contains(r#""type":"join""#));
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let parsed = SignalMessage::parse(r#"{"type":"mute","client_id":"x"}"#).unwrap();
        assert_eq!(parsed, SignalMessage::Unknown);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        assert!(SignalMessage::parse(r#"{"type":"join","room":"r1"}"#).is_err());
    }

    #[test]
    fn screenshot_ingress_and_egress_shapes() {
        let ingress =
            SignalMessage::parse(r#"{"type":"screenshot","target_id":"bob","data":"QUJD"}"#)
                .unwrap();
        assert_eq!(
            ingress,
            SignalMessage::Screenshot {
                target_id: Some("bob".into()),
                client_id: None,
                data: "QUJD".into(),
            }
        );

        let egress = SignalMessage::Screenshot {
            target_id: None,
            client_id: Some("alice".into()),
            data: "QUJD".into(),
        };
        let json = egress.to_json().unwrap();
        assert!(json.contains(r#""client_id":"alice""#));
        assert!(!json.contains("target_id"));
    }

    #[test]
    fn candidate_round_trips() {
        let msg = SignalMessage::Candidate {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 54321 typ host".into(),
        };
        let json = msg.to_json().unwrap();
        assert_eq!(SignalMessage::parse(&json).unwrap(), msg);
    }
}
