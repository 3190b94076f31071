//! Wire protocol spoken with the signaling relay.
//!
//! Messages are JSON objects tagged by a `type` field, one per transport
//! frame. [`ClientMessage`] covers everything the client emits and
//! [`ServerMessage`] everything the relay delivers; transport-level
//! connected/disconnected notifications arrive separately as
//! [`crate::transport::TransportEvent`]s.

use crate::peer::NegotiationPayload;
use crate::types::call::{CallMode, EndReason};
use crate::types::peer::PeerId;
use serde::{Deserialize, Serialize};

/// Messages emitted by the client toward the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Register {
        peer_id: PeerId,
    },
    CallOffer {
        to: PeerId,
        from: PeerId,
        mode: CallMode,
        payload: NegotiationPayload,
    },
    CallAnswer {
        to: PeerId,
        from: PeerId,
        payload: NegotiationPayload,
    },
    CallEnd {
        to: PeerId,
        from: PeerId,
    },
}

impl ClientMessage {
    pub fn to_frame(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Messages delivered by the relay to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    PresenceSnapshot {
        peers: Vec<PeerId>,
    },
    PresenceJoin {
        peer_id: PeerId,
    },
    PresenceLeave {
        peer_id: PeerId,
    },
    CallOffer {
        from: PeerId,
        mode: CallMode,
        payload: NegotiationPayload,
    },
    CallAnswer {
        from: PeerId,
        payload: NegotiationPayload,
    },
    CallEnd {
        from: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<EndReason>,
    },
}

impl ServerMessage {
    pub fn from_frame(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Call signaling routed from the connection manager to the call
/// controller, in relay delivery order.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Offer {
        from: PeerId,
        mode: CallMode,
        payload: NegotiationPayload,
    },
    Answer {
        from: PeerId,
        payload: NegotiationPayload,
    },
    End {
        from: PeerId,
        reason: Option<EndReason>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_offer_wire_format() {
        let msg = ClientMessage::CallOffer {
            to: "u2".into(),
            from: "u1".into(),
            mode: CallMode::Video,
            payload: NegotiationPayload::new(json!({"sdp": "v=0"})),
        };

        let value: serde_json::Value = serde_json::from_slice(&msg.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "call-offer",
                "to": "u2",
                "from": "u1",
                "mode": "video",
                "payload": {"sdp": "v=0"},
            })
        );
    }

    #[test]
    fn presence_snapshot_decodes() {
        let frame = br#"{"type":"presence-snapshot","peers":["u1","u2","u3"]}"#;
        let msg = ServerMessage::from_frame(frame).unwrap();
        assert_eq!(
            msg,
            ServerMessage::PresenceSnapshot {
                peers: vec!["u1".into(), "u2".into(), "u3".into()],
            }
        );
    }

    #[test]
    fn call_end_reason_is_optional() {
        let with_reason =
            ServerMessage::from_frame(br#"{"type":"call-end","from":"u2","reason":"not_answered"}"#)
                .unwrap();
        assert_eq!(
            with_reason,
            ServerMessage::CallEnd {
                from: "u2".into(),
                reason: Some(EndReason::NotAnswered),
            }
        );

        let without = ServerMessage::from_frame(br#"{"type":"call-end","from":"u2"}"#).unwrap();
        assert_eq!(
            without,
            ServerMessage::CallEnd {
                from: "u2".into(),
                reason: None,
            }
        );
    }
}
