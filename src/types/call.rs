use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a single call attempt.
///
/// A fresh id is generated for every outgoing dial and every incoming
/// offer; it never outlives the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random call id (32 uppercase hex chars).
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media mode of a call, fixed by the caller for the whole attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    Audio,
    Video,
}

impl CallMode {
    pub fn has_video(self) -> bool {
        self == CallMode::Video
    }
}

/// Which side of the call this client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Why a call session reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Nobody picked up before the ring timeout.
    NotAnswered,
    /// The callee declined the offer.
    Declined,
    /// The caller gave up before the callee answered.
    CallerEnded,
    /// Either party hung up an established call.
    Hangup,
    /// The peer transport reported a closed connection.
    PeerClosed,
    /// The peer transport failed after signaling began.
    Error,
    /// Local media could not be acquired.
    MediaDenied,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::NotAnswered => "not_answered",
            EndReason::Declined => "declined",
            EndReason::CallerEnded => "caller_ended",
            EndReason::Hangup => "hangup",
            EndReason::PeerClosed => "peer_closed",
            EndReason::Error => "error",
            EndReason::MediaDenied => "media_denied",
        };
        f.write_str(s)
    }
}
