use crate::calls::state::CallState;
use crate::connection::ConnectionStatus;
use crate::types::call::{CallId, CallMode};
use crate::types::peer::PeerId;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// The connection manager changed status.
#[derive(Debug, Clone)]
pub struct ConnectionStatusChanged {
    pub status: ConnectionStatus,
    pub attempt: u32,
}

/// The reconnect budget is exhausted; only an explicit new `run()` will
/// bring the channel back.
#[derive(Debug, Clone)]
pub struct PersistentDisconnect {
    pub attempts: u32,
}

/// Registration was deferred until the next successful connect.
/// Informational, not an error.
#[derive(Debug, Clone)]
pub struct RegistrationPending {
    pub peer_id: PeerId,
}

/// A change to the presence registry.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    Snapshot { peers: Vec<PeerId> },
    Joined { peer_id: PeerId },
    Left { peer_id: PeerId },
    /// The transport was lost; reachability is unknown again.
    Cleared,
}

/// An inbound call offer started ringing locally.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub id: CallId,
    pub from: PeerId,
    pub mode: CallMode,
}

/// The active call session moved to a new state (or toggled minimization).
#[derive(Debug, Clone)]
pub struct CallStateChanged {
    pub id: CallId,
    pub state: CallState,
    pub minimized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingtoneKind {
    /// Ringback heard by the caller while dialing.
    Outbound,
    /// Ring heard by the callee for an incoming offer.
    Inbound,
}

/// The presentation tier should start or stop playing a ring tone.
#[derive(Debug, Clone)]
pub struct RingtoneEvent {
    pub kind: RingtoneKind,
    pub playing: bool,
}

/// An inbound offer was rejected because a session is already active.
#[derive(Debug, Clone)]
pub struct RejectedOffer {
    pub from: PeerId,
    pub mode: CallMode,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event type.
        ///
        /// Receivers are handles: dropping one unsubscribes it. Observers
        /// that fall behind miss events rather than blocking the core.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Connection events
    (connection, Arc<ConnectionStatusChanged>),
    (persistent_disconnect, Arc<PersistentDisconnect>),
    (registration_pending, Arc<RegistrationPending>),
    (presence, Arc<PresenceEvent>),

    // Call events
    (incoming_call, Arc<IncomingCall>),
    (call_state, Arc<CallStateChanged>),
    (ringtone, Arc<RingtoneEvent>),
    (rejected_offer, Arc<RejectedOffer>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
