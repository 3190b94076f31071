//! Call session controller.
//!
//! Drives one call attempt at a time: user commands (dial, accept, reject,
//! hang up) on one side, relay signaling and peer-transport events on the
//! other. All timer expirations are routed through the controller's own
//! event loop so that state changes happen in one place, in order.

use super::error::CallError;
use super::session::{CallSession, CallSnapshot};
use super::state::{CallState, CallTransition, InvalidTransition};
use crate::config::CallConfig;
use crate::connection::ConnectionManager;
use crate::media::MediaDevices;
use crate::peer::{PeerTransportEvent, PeerTransportFactory};
use crate::signaling::{ClientMessage, SignalingEvent};
use crate::types::call::{CallId, CallMode, EndReason};
use crate::types::events::{
    CallStateChanged, EventBus, IncomingCall, RejectedOffer, RingtoneEvent, RingtoneKind,
};
use crate::types::peer::PeerId;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

const TICK_CHANNEL_CAPACITY: usize = 16;

/// Internal timer expirations, delivered to the controller loop.
#[derive(Debug)]
enum Tick {
    RingTimeout(CallId),
    Linger(CallId),
}

/// The per-client call session controller.
///
/// Holds at most one [`CallSession`] in its single, swappable slot; a new
/// dial or inbound offer is rejected with
/// [`CallError::SessionAlreadyActive`] until the active session reaches a
/// terminal state.
pub struct CallController {
    local_id: PeerId,
    config: CallConfig,
    connection: Arc<ConnectionManager>,
    media: Arc<dyn MediaDevices>,
    peer_factory: Arc<dyn PeerTransportFactory>,
    events: Arc<EventBus>,
    session: Mutex<Option<CallSession>>,
    tick_tx: mpsc::Sender<Tick>,
    tick_rx: Mutex<Option<mpsc::Receiver<Tick>>>,
}

impl CallController {
    pub fn new(
        local_id: PeerId,
        config: CallConfig,
        connection: Arc<ConnectionManager>,
        media: Arc<dyn MediaDevices>,
        peer_factory: Arc<dyn PeerTransportFactory>,
    ) -> Arc<Self> {
        let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let events = Arc::clone(connection.events());
        Arc::new(Self {
            local_id,
            config,
            connection,
            media,
            peer_factory,
            events,
            session: Mutex::new(None),
            tick_tx,
            tick_rx: Mutex::new(Some(tick_rx)),
        })
    }

    /// Subscribe to relay signaling and start the controller loop.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, CallError> {
        let ticks = self
            .tick_rx
            .lock()
            .await
            .take()
            .ok_or(CallError::AlreadyRunning)?;
        let signaling = self.connection.subscribe_signaling().await;
        let controller = Arc::clone(self);
        Ok(tokio::spawn(controller.run_loop(signaling, ticks)))
    }

    async fn run_loop(
        self: Arc<Self>,
        mut signaling: mpsc::Receiver<SignalingEvent>,
        mut ticks: mpsc::Receiver<Tick>,
    ) {
        loop {
            tokio::select! {
                event = signaling.recv() => match event {
                    Some(SignalingEvent::Offer { from, mode, payload }) => {
                        self.handle_offer(from, mode, payload).await;
                    }
                    Some(SignalingEvent::Answer { from, payload }) => {
                        self.handle_answer(from, payload).await;
                    }
                    Some(SignalingEvent::End { from, reason }) => {
                        self.handle_remote_end(from, reason).await;
                    }
                    None => {
                        debug!(target: "Calls", "Signaling channel closed; controller stopping");
                        break;
                    }
                },
                tick = ticks.recv() => match tick {
                    Some(Tick::RingTimeout(id)) => self.handle_ring_timeout(id).await,
                    Some(Tick::Linger(id)) => self.handle_linger(id).await,
                    None => break,
                },
            }
        }
    }

    /// Start an outgoing call.
    ///
    /// Acquires local media for `mode`, creates a fresh peer transport,
    /// emits the call-offer, and arms the ring timeout.
    pub async fn dial(
        self: &Arc<Self>,
        peer_id: PeerId,
        mode: CallMode,
    ) -> Result<CallId, CallError> {
        if !self.connection.is_connected().await {
            return Err(crate::error::ConnectionError::NotConnected.into());
        }

        let mut slot = self.session.lock().await;
        if let Some(existing) = slot.as_ref()
            && !existing.state.is_ended()
        {
            return Err(CallError::SessionAlreadyActive);
        }

        let id = CallId::generate();
        info!(target: "Calls", "Dialing {peer_id} ({mode:?}, call {id})");
        let mut session = CallSession::outgoing(id.clone(), peer_id.clone(), mode);

        let local = match self.media.acquire(mode).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(target: "Calls", "Media acquisition failed for call {id}: {e}");
                self.finish(
                    &mut session,
                    CallTransition::Terminated {
                        reason: EndReason::MediaDenied,
                    },
                    false,
                )
                .await;
                *slot = Some(session);
                return Err(e.into());
            }
        };

        let created = self.peer_factory.create(&local).await;
        session.local_media = Some(local);
        let (peer_transport, peer_events) = match created {
            Ok(pair) => pair,
            Err(e) => {
                warn!(target: "Calls", "Peer transport creation failed for call {id}: {e}");
                self.finish(
                    &mut session,
                    CallTransition::Terminated {
                        reason: EndReason::Error,
                    },
                    false,
                )
                .await;
                *slot = Some(session);
                return Err(e.into());
            }
        };
        session.peer = Some(Arc::clone(&peer_transport));

        let payload = match peer_transport.create_offer().await {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Calls", "Offer negotiation failed for call {id}: {e}");
                self.finish(
                    &mut session,
                    CallTransition::Terminated {
                        reason: EndReason::Error,
                    },
                    false,
                )
                .await;
                *slot = Some(session);
                return Err(e.into());
            }
        };

        let offer = ClientMessage::CallOffer {
            to: peer_id,
            from: self.local_id.clone(),
            mode,
            payload,
        };
        if let Err(e) = self.connection.send(&offer).await {
            warn!(target: "Calls", "Failed to emit call-offer for call {id}: {e}");
            self.finish(
                &mut session,
                CallTransition::Terminated {
                    reason: EndReason::Error,
                },
                false,
            )
            .await;
            *slot = Some(session);
            return Err(e.into());
        }

        self.spawn_peer_pump(&id, peer_events);
        session.ring_timer = Some(self.spawn_ring_timer(&id));
        self.emit_ringtone(RingtoneKind::Outbound, true);
        self.emit_state(&session);
        *slot = Some(session);
        Ok(id)
    }

    /// Accept the incoming call currently ringing.
    ///
    /// Media is acquired for the caller's advertised mode; audio-only calls
    /// never open the camera.
    pub async fn accept(self: &Arc<Self>) -> Result<(), CallError> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(CallError::NoActiveSession)?;

        if !session.state.can_accept() {
            return Err(InvalidTransition {
                current_state: format!("{:?}", session.state),
                attempted: "LocalAccepted".to_string(),
            }
            .into());
        }

        let id = session.id.clone();
        info!(target: "Calls", "Accepting call {id} from {}", session.peer_id);

        let local = match self.media.acquire(session.mode).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(target: "Calls", "Media acquisition failed for call {id}: {e}");
                self.finish(
                    session,
                    CallTransition::Terminated {
                        reason: EndReason::MediaDenied,
                    },
                    false,
                )
                .await;
                return Err(e.into());
            }
        };

        let created = self.peer_factory.create(&local).await;
        session.local_media = Some(local);
        let (peer_transport, peer_events) = match created {
            Ok(pair) => pair,
            Err(e) => {
                self.finish(
                    session,
                    CallTransition::Terminated {
                        reason: EndReason::Error,
                    },
                    false,
                )
                .await;
                return Err(e.into());
            }
        };
        session.peer = Some(Arc::clone(&peer_transport));

        let Some(remote) = session.remote_payload.clone() else {
            self.finish(
                session,
                CallTransition::Terminated {
                    reason: EndReason::Error,
                },
                false,
            )
            .await;
            return Err(crate::peer::PeerError::Negotiation(
                "missing remote offer payload".to_string(),
            )
            .into());
        };

        let answer_payload = match peer_transport.create_answer(&remote).await {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Calls", "Answer negotiation failed for call {id}: {e}");
                self.finish(
                    session,
                    CallTransition::Terminated {
                        reason: EndReason::Error,
                    },
                    false,
                )
                .await;
                return Err(e.into());
            }
        };

        let answer = ClientMessage::CallAnswer {
            to: session.peer_id.clone(),
            from: self.local_id.clone(),
            payload: answer_payload,
        };
        if let Err(e) = self.connection.send(&answer).await {
            self.finish(
                session,
                CallTransition::Terminated {
                    reason: EndReason::Error,
                },
                false,
            )
            .await;
            return Err(e.into());
        }

        session.cancel_ring_timer();
        self.emit_ringtone(RingtoneKind::Inbound, false);
        session.apply_transition(CallTransition::LocalAccepted)?;
        session.start_elapsed_timer();
        self.spawn_peer_pump(&id, peer_events);
        self.emit_state(session);
        Ok(())
    }

    /// Decline the incoming call currently ringing.
    pub async fn reject(&self) -> Result<(), CallError> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(CallError::NoActiveSession)?;

        if !session.state.can_reject() {
            return Err(InvalidTransition {
                current_state: format!("{:?}", session.state),
                attempted: "LocalRejected".to_string(),
            }
            .into());
        }

        info!(target: "Calls", "Rejecting call {} from {}", session.id, session.peer_id);
        self.finish(session, CallTransition::LocalRejected, true).await;
        Ok(())
    }

    /// End the current call attempt, whatever phase it is in.
    ///
    /// Works identically whether the call UI is minimized or not.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(CallError::NoActiveSession)?;
        if session.state.is_ended() {
            return Err(CallError::NoActiveSession);
        }

        info!(target: "Calls", "Hanging up call {}", session.id);
        self.finish(
            session,
            CallTransition::Terminated {
                reason: EndReason::Hangup,
            },
            true,
        )
        .await;
        Ok(())
    }

    /// Shrink the call UI. Media and the peer transport are untouched.
    pub async fn minimize(&self) -> Result<(), CallError> {
        self.set_minimized(true).await
    }

    /// Restore the call UI.
    pub async fn maximize(&self) -> Result<(), CallError> {
        self.set_minimized(false).await
    }

    async fn set_minimized(&self, minimized: bool) -> Result<(), CallError> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(CallError::NoActiveSession)?;
        session.minimized = minimized;
        self.emit_state(session);
        Ok(())
    }

    /// Snapshot of the active session, or `None` when idle.
    pub async fn active_session(&self) -> Option<CallSnapshot> {
        self.session.lock().await.as_ref().map(|s| s.snapshot())
    }

    async fn handle_offer(
        self: &Arc<Self>,
        from: PeerId,
        mode: CallMode,
        payload: crate::peer::NegotiationPayload,
    ) {
        let mut slot = self.session.lock().await;

        if let Some(existing) = slot.as_mut()
            && !existing.state.is_ended()
        {
            let is_glare = matches!(existing.state, CallState::Dialing { .. })
                && existing.peer_id == from;
            if !is_glare {
                warn!(
                    target: "Calls",
                    "Rejecting call-offer from {from}: session {} already active",
                    existing.id
                );
                let _ = self
                    .events
                    .rejected_offer
                    .send(Arc::new(RejectedOffer { from, mode }));
                return;
            }

            // Glare: both sides dialed each other. Lowest id keeps its
            // outbound attempt; the other side yields to the inbound offer.
            if self.local_id < from {
                info!(target: "Calls", "Glare with {from}: our offer wins, ignoring theirs");
                return;
            }
            info!(target: "Calls", "Glare with {from}: yielding to their offer");
            self.abandon(existing).await;
        }

        let id = CallId::generate();
        info!(target: "Calls", "Incoming {mode:?} call {id} from {from}");
        let mut session = CallSession::incoming(id.clone(), from.clone(), mode, payload);
        session.ring_timer = Some(self.spawn_ring_timer(&id));
        self.emit_ringtone(RingtoneKind::Inbound, true);
        let _ = self
            .events
            .incoming_call
            .send(Arc::new(IncomingCall { id, from, mode }));
        self.emit_state(&session);
        *slot = Some(session);
    }

    async fn handle_answer(&self, from: PeerId, payload: crate::peer::NegotiationPayload) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            debug!(target: "Calls", "Ignoring call-answer from {from}: no session");
            return;
        };
        if session.peer_id != from || !matches!(session.state, CallState::Dialing { .. }) {
            debug!(
                target: "Calls",
                "Ignoring call-answer from {from} in state {:?}", session.state
            );
            return;
        }

        let Some(peer_transport) = session.peer.clone() else {
            warn!(target: "Calls", "Call {} has no peer transport for answer", session.id);
            return;
        };
        if let Err(e) = peer_transport.apply_remote(&payload).await {
            warn!(target: "Calls", "Applying remote answer failed for call {}: {e}", session.id);
            self.finish(
                session,
                CallTransition::Terminated {
                    reason: EndReason::Error,
                },
                false,
            )
            .await;
            return;
        }

        info!(target: "Calls", "Call {} answered by {from}", session.id);
        session.cancel_ring_timer();
        self.emit_ringtone(RingtoneKind::Outbound, false);
        if let Err(e) = session.apply_transition(CallTransition::AnswerReceived) {
            warn!(target: "Calls", "Answer transition failed: {e}");
            return;
        }
        session.start_elapsed_timer();
        self.emit_state(session);
    }

    async fn handle_remote_end(&self, from: PeerId, reason: Option<EndReason>) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            debug!(target: "Calls", "Ignoring call-end from {from}: no session");
            return;
        };
        if session.peer_id != from || session.state.is_ended() {
            // A call-end racing our own teardown is expected and harmless.
            debug!(target: "Calls", "Ignoring stale call-end from {from}");
            return;
        }

        let reason = reason.unwrap_or(match session.state {
            CallState::Ringing { .. } => EndReason::CallerEnded,
            CallState::Dialing { .. } => EndReason::Declined,
            _ => EndReason::Hangup,
        });
        info!(target: "Calls", "Call {} ended by {from} ({reason})", session.id);
        self.finish(session, CallTransition::Terminated { reason }, false)
            .await;
    }

    async fn handle_ring_timeout(&self, id: CallId) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else { return };
        if session.id != id || !session.state.is_ring_phase() {
            return;
        }

        info!(target: "Calls", "Call {id} not answered within ring timeout");
        // Only the caller owes the peer a call-end, and only if the peer is
        // still reachable.
        let notify_peer = matches!(session.state, CallState::Dialing { .. })
            && self.connection.presence().contains(&session.peer_id).await;
        self.finish(session, CallTransition::RingTimeout, notify_peer)
            .await;
    }

    async fn handle_linger(&self, id: CallId) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref()
            && session.id == id
            && session.state.is_ended()
        {
            debug!(target: "Calls", "Clearing ended call {id}; controller idle again");
            *slot = None;
        }
    }

    /// Tear down a session on any path into `Ended`.
    ///
    /// Every resource is released here regardless of how the call ends:
    /// timers cancelled, ring tone stopped, media released exactly once,
    /// peer transport destroyed.
    async fn finish(
        &self,
        session: &mut CallSession,
        transition: CallTransition,
        notify_peer: bool,
    ) {
        if session.state.is_ended() {
            return;
        }

        if notify_peer {
            let message = ClientMessage::CallEnd {
                to: session.peer_id.clone(),
                from: self.local_id.clone(),
            };
            if let Err(e) = self.connection.send(&message).await {
                debug!(target: "Calls", "Could not emit call-end for {}: {e}", session.id);
            }
        }

        // The ring timer is armed iff a ring tone is playing.
        let ringtone = if session.ring_timer.is_some() {
            match session.state {
                CallState::Dialing { .. } => Some(RingtoneKind::Outbound),
                CallState::Ringing { .. } => Some(RingtoneKind::Inbound),
                _ => None,
            }
        } else {
            None
        };

        session.cancel_timers();
        if let Some(kind) = ringtone {
            self.emit_ringtone(kind, false);
        }

        if let Some(handle) = session.local_media.take() {
            self.media.release(handle).await;
        }
        session.remote_media.take();
        session.cleanup_peer().await;

        if let Err(e) = session.apply_transition(transition) {
            warn!(target: "Calls", "Teardown transition failed for {}: {e}", session.id);
        }
        self.emit_state(session);
        session.linger_timer = Some(self.spawn_linger(&session.id));
    }

    /// Silently discard a dialing session that lost a glare race. No state
    /// event and no call-end: the replacing inbound session is announced
    /// immediately after.
    async fn abandon(&self, session: &mut CallSession) {
        let had_ring = session.ring_timer.is_some();
        session.cancel_timers();
        if had_ring {
            self.emit_ringtone(RingtoneKind::Outbound, false);
        }
        if let Some(handle) = session.local_media.take() {
            self.media.release(handle).await;
        }
        session.remote_media.take();
        session.cleanup_peer().await;
    }

    /// Drain peer transport events for the session `id`.
    ///
    /// The task ends when the transport closes its event channel (on
    /// destroy) or when the session it belongs to is gone.
    fn spawn_peer_pump(
        self: &Arc<Self>,
        id: &CallId,
        mut events: mpsc::Receiver<PeerTransportEvent>,
    ) {
        let controller = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerTransportEvent::RemoteMedia(handle) => {
                        let mut slot = controller.session.lock().await;
                        match slot.as_mut() {
                            Some(s) if s.id == id && !s.state.is_ended() => {
                                debug!(target: "Calls", "Remote media arrived for call {id}");
                                s.remote_media = Some(handle);
                            }
                            _ => break,
                        }
                    }
                    PeerTransportEvent::Connected => {
                        debug!(target: "Calls", "Peer transport connected for call {id}");
                    }
                    PeerTransportEvent::Closed => {
                        controller.end_by_peer(&id, EndReason::PeerClosed).await;
                        break;
                    }
                    PeerTransportEvent::Error(e) => {
                        warn!(target: "Calls", "Peer transport error for call {id}: {e}");
                        controller.end_by_peer(&id, EndReason::Error).await;
                        break;
                    }
                }
            }
        });
    }

    /// End a session because its peer transport reported closed/error. The
    /// peer already knows, so no call-end is re-emitted.
    async fn end_by_peer(&self, id: &CallId, reason: EndReason) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else { return };
        if session.id != *id || session.state.is_ended() {
            return;
        }
        self.finish(session, CallTransition::Terminated { reason }, false)
            .await;
    }

    fn spawn_ring_timer(&self, id: &CallId) -> JoinHandle<()> {
        let tx = self.tick_tx.clone();
        let id = id.clone();
        let timeout = self.config.ring_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Tick::RingTimeout(id)).await;
        })
    }

    fn spawn_linger(&self, id: &CallId) -> JoinHandle<()> {
        let tx = self.tick_tx.clone();
        let id = id.clone();
        let linger = self.config.ended_linger;
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            let _ = tx.send(Tick::Linger(id)).await;
        })
    }

    fn emit_ringtone(&self, kind: RingtoneKind, playing: bool) {
        let _ = self
            .events
            .ringtone
            .send(Arc::new(RingtoneEvent { kind, playing }));
    }

    fn emit_state(&self, session: &CallSession) {
        let _ = self.events.call_state.send(Arc::new(CallStateChanged {
            id: session.id.clone(),
            state: session.state.clone(),
            minimized: session.minimized,
        }));
    }
}
