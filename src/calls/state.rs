//! Call state machine implementation.

use crate::types::call::EndReason;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current state of a call session.
///
/// The idle state is represented by the controller holding no session at
/// all; a session always starts in `Dialing` (outgoing) or `Ringing`
/// (incoming) and ends in `Ended`.
#[derive(Debug, Clone, Serialize)]
pub enum CallState {
    /// Outgoing call: offer sent, waiting for an answer.
    Dialing { since: DateTime<Utc> },
    /// Incoming call: ringing locally, offer payload stored.
    Ringing { since: DateTime<Utc> },
    /// Call established, media flowing.
    Connected { since: DateTime<Utc> },
    /// Terminal state.
    Ended {
        reason: EndReason,
        at: DateTime<Utc>,
    },
}

impl CallState {
    pub fn dialing() -> Self {
        Self::Dialing { since: Utc::now() }
    }

    pub fn ringing() -> Self {
        Self::Ringing { since: Utc::now() }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    /// True while an unanswered attempt is pending (either direction).
    pub fn is_ring_phase(&self) -> bool {
        matches!(self, Self::Dialing { .. } | Self::Ringing { .. })
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    pub fn can_reject(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    /// Apply a transition, producing the next state.
    pub fn apply(&self, transition: &CallTransition) -> Result<CallState, InvalidTransition> {
        let next = match (self, transition) {
            (CallState::Dialing { .. }, CallTransition::AnswerReceived) => {
                CallState::Connected { since: Utc::now() }
            }
            (CallState::Ringing { .. }, CallTransition::LocalAccepted) => {
                CallState::Connected { since: Utc::now() }
            }
            (CallState::Ringing { .. }, CallTransition::LocalRejected) => CallState::Ended {
                reason: EndReason::Declined,
                at: Utc::now(),
            },
            (
                CallState::Dialing { .. } | CallState::Ringing { .. },
                CallTransition::RingTimeout,
            ) => CallState::Ended {
                reason: EndReason::NotAnswered,
                at: Utc::now(),
            },
            (current, CallTransition::Terminated { reason }) if !current.is_ended() => {
                CallState::Ended {
                    reason: *reason,
                    at: Utc::now(),
                }
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        Ok(next)
    }
}

/// State transitions for call sessions.
#[derive(Debug, Clone)]
pub enum CallTransition {
    /// The remote party answered our offer.
    AnswerReceived,
    /// The local user accepted an incoming offer.
    LocalAccepted,
    /// The local user declined an incoming offer.
    LocalRejected,
    /// The ring timeout elapsed without an answer.
    RingTimeout,
    /// Any other path into the terminal state.
    Terminated { reason: EndReason },
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
