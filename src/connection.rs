//! Connection manager: owns the single logical channel to the relay.
//!
//! Drives connect/reconnect with exponential backoff, replays deferred
//! registration, keeps the [`PresenceRegistry`] current, and routes inbound
//! call signaling to whoever holds the subscription handle.

use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::presence::PresenceRegistry;
use crate::signaling::{ClientMessage, ServerMessage, SignalingEvent};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{
    ConnectionStatusChanged, EventBus, PersistentDisconnect, PresenceEvent, RegistrationPending,
};
use crate::types::peer::PeerId;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::sleep;

const SIGNALING_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle status of the relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug)]
struct ConnectionState {
    status: ConnectionStatus,
    attempt: u32,
    pending_registration: Option<PeerId>,
}

/// Read-only view of the connection state.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub pending_registration: Option<PeerId>,
}

enum Loss {
    LocalStop,
    RemoteClosed,
    Abnormal(String),
}

/// Owns the transport to the relay and everything derived from it.
///
/// All state lives in explicit fields behind locks; the pending-registration
/// slot and the transport slot are the only singletons and both are
/// swappable, never ambient.
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport_factory: Arc<dyn TransportFactory>,
    event_bus: Arc<EventBus>,
    presence: Arc<PresenceRegistry>,
    state: Mutex<ConnectionState>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    signaling_tx: Mutex<Option<mpsc::Sender<SignalingEvent>>>,
    is_running: AtomicBool,
    stop_requested: AtomicBool,
    stop_notify: Notify,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        transport_factory: Arc<dyn TransportFactory>,
        event_bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport_factory,
            event_bus,
            presence: Arc::new(PresenceRegistry::new()),
            state: Mutex::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                attempt: 0,
                pending_registration: None,
            }),
            transport: Mutex::new(None),
            signaling_tx: Mutex::new(None),
            is_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
        })
    }

    /// Supervising loop: connect, pump transport events, reconnect on loss.
    ///
    /// Returns `Ok(())` after a local [`shutdown`](Self::shutdown) or a
    /// remote-initiated intentional close, and
    /// [`ConnectionError::PersistentDisconnect`] once the retry budget is
    /// exhausted. Calling `run` again after a persistent disconnect is the
    /// explicit manual retry: the attempt counter starts over.
    pub async fn run(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Connection", "run() called while already running");
            return Err(ConnectionError::AlreadyRunning);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_running.store(false, Ordering::SeqCst);
        });
        self.stop_requested.store(false, Ordering::SeqCst);

        {
            let mut state = self.state.lock().await;
            state.attempt = 0;
            state.status = ConnectionStatus::Connecting;
        }
        self.emit_status().await;

        loop {
            match self.transport_factory.create_transport().await {
                Ok((transport, events)) => {
                    *self.transport.lock().await = Some(transport);
                    let pending = {
                        let mut state = self.state.lock().await;
                        state.status = ConnectionStatus::Connected;
                        state.attempt = 0;
                        state.pending_registration.take()
                    };
                    info!(target: "Connection", "Connected to relay");
                    self.emit_status().await;

                    if let Some(peer_id) = pending {
                        self.replay_registration(peer_id).await;
                    }

                    let loss = self.pump_events(events).await;
                    self.teardown_transport().await;

                    match loss {
                        Loss::LocalStop => {
                            info!(target: "Connection", "Connection manager stopped");
                            self.set_disconnected().await;
                            return Ok(());
                        }
                        Loss::RemoteClosed => {
                            info!(target: "Connection", "Relay closed the channel; not reconnecting");
                            self.set_disconnected().await;
                            return Ok(());
                        }
                        Loss::Abnormal(why) => {
                            warn!(target: "Connection", "Transport lost: {why}");
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "Connection", "Connect attempt failed: {e}");
                }
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                self.set_disconnected().await;
                return Ok(());
            }

            let attempt = self.state.lock().await.attempt;
            if attempt >= self.config.max_reconnect_attempts {
                error!(target: "Connection", "Giving up after {attempt} reconnect attempts");
                self.set_disconnected().await;
                let _ = self
                    .event_bus
                    .persistent_disconnect
                    .send(Arc::new(PersistentDisconnect { attempts: attempt }));
                return Err(ConnectionError::PersistentDisconnect { attempts: attempt });
            }

            let delay = Duration::from_secs(1u64 << attempt);
            {
                let mut state = self.state.lock().await;
                state.status = ConnectionStatus::Reconnecting;
            }
            self.emit_status().await;
            info!(
                target: "Connection",
                "Will retry connect in {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                self.config.max_reconnect_attempts
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.stop_notify.notified() => {
                    self.set_disconnected().await;
                    return Ok(());
                }
            }
            self.state.lock().await.attempt += 1;
        }
    }

    /// Stop the supervising loop and drop the transport. Local and
    /// intentional, so no reconnect is attempted.
    pub async fn shutdown(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    /// Announce this client's id to the relay.
    ///
    /// Sent immediately while connected; otherwise stored in the
    /// pending-registration slot and replayed exactly once on the next
    /// successful connect. Repeats while connected are sent as-is, never
    /// deduplicated locally.
    pub async fn register(&self, peer_id: PeerId) -> Result<(), ConnectionError> {
        let connected = {
            self.state.lock().await.status == ConnectionStatus::Connected
        };

        if connected {
            match self
                .send(&ClientMessage::Register {
                    peer_id: peer_id.clone(),
                })
                .await
            {
                Ok(()) => {
                    info!(target: "Connection", "Registered as {peer_id}");
                    return Ok(());
                }
                Err(ConnectionError::NotConnected) => {
                    // Lost the transport between the check and the send;
                    // fall through to deferral.
                }
                Err(e) => return Err(e),
            }
        }

        debug!(target: "Connection", "Not connected; deferring registration for {peer_id}");
        self.state.lock().await.pending_registration = Some(peer_id.clone());
        let _ = self
            .event_bus
            .registration_pending
            .send(Arc::new(RegistrationPending { peer_id }));
        Ok(())
    }

    /// Send a signaling message to the relay.
    ///
    /// The transport is written only here, keeping the manager its sole
    /// writer.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), ConnectionError> {
        let frame = message.to_frame()?;
        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(ConnectionError::NotConnected)?;
        transport
            .send_frame(&frame)
            .await
            .map_err(|e| ConnectionError::TransportUnavailable(e.to_string()))
    }

    /// Subscribe to inbound call signaling.
    ///
    /// The returned receiver is the subscription handle: dropping it
    /// unsubscribes. A new subscription replaces any previous one.
    pub async fn subscribe_signaling(&self) -> mpsc::Receiver<SignalingEvent> {
        let (tx, rx) = mpsc::channel(SIGNALING_CHANNEL_CAPACITY);
        *self.signaling_tx.lock().await = Some(tx);
        rx
    }

    pub async fn state(&self) -> ConnectionSnapshot {
        let state = self.state.lock().await;
        ConnectionSnapshot {
            status: state.status,
            attempt: state.attempt,
            pending_registration: state.pending_registration.clone(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.status == ConnectionStatus::Connected
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    async fn replay_registration(&self, peer_id: PeerId) {
        info!(target: "Connection", "Replaying deferred registration for {peer_id}");
        if let Err(e) = self
            .send(&ClientMessage::Register {
                peer_id: peer_id.clone(),
            })
            .await
        {
            warn!(target: "Connection", "Deferred registration failed: {e}");
            self.state.lock().await.pending_registration = Some(peer_id);
        }
    }

    async fn pump_events(&self, mut events: mpsc::Receiver<TransportEvent>) -> Loss {
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                return Loss::LocalStop;
            }
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        debug!(target: "Connection", "Transport reported connected");
                    }
                    Some(TransportEvent::FrameReceived(frame)) => {
                        self.handle_frame(&frame).await;
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        return if reason.is_intentional() {
                            Loss::RemoteClosed
                        } else {
                            Loss::Abnormal(format!("{reason:?}"))
                        };
                    }
                    None => return Loss::Abnormal("transport event stream ended".to_string()),
                },
                _ = self.stop_notify.notified() => return Loss::LocalStop,
            }
        }
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let message = match ServerMessage::from_frame(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!(target: "Connection", "Dropping malformed frame: {e}");
                return;
            }
        };

        match message {
            ServerMessage::PresenceSnapshot { peers } => {
                debug!(target: "Connection", "Presence snapshot: {} peers", peers.len());
                self.presence.apply_snapshot(peers.clone()).await;
                let _ = self
                    .event_bus
                    .presence
                    .send(Arc::new(PresenceEvent::Snapshot { peers }));
            }
            ServerMessage::PresenceJoin { peer_id } => {
                debug!(target: "Connection", "Peer joined: {peer_id}");
                self.presence.join(peer_id.clone()).await;
                let _ = self
                    .event_bus
                    .presence
                    .send(Arc::new(PresenceEvent::Joined { peer_id }));
            }
            ServerMessage::PresenceLeave { peer_id } => {
                debug!(target: "Connection", "Peer left: {peer_id}");
                self.presence.leave(&peer_id).await;
                let _ = self
                    .event_bus
                    .presence
                    .send(Arc::new(PresenceEvent::Left { peer_id }));
            }
            ServerMessage::CallOffer {
                from,
                mode,
                payload,
            } => {
                self.forward_signaling(SignalingEvent::Offer {
                    from,
                    mode,
                    payload,
                })
                .await;
            }
            ServerMessage::CallAnswer { from, payload } => {
                self.forward_signaling(SignalingEvent::Answer { from, payload })
                    .await;
            }
            ServerMessage::CallEnd { from, reason } => {
                self.forward_signaling(SignalingEvent::End { from, reason })
                    .await;
            }
        }
    }

    async fn forward_signaling(&self, event: SignalingEvent) {
        let tx = self.signaling_tx.lock().await.clone();
        match tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    debug!(target: "Connection", "Signaling subscriber dropped");
                    *self.signaling_tx.lock().await = None;
                }
            }
            None => {
                debug!(target: "Connection", "No signaling subscriber; dropping event");
            }
        }
    }

    async fn teardown_transport(&self) {
        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        self.presence.clear().await;
        let _ = self.event_bus.presence.send(Arc::new(PresenceEvent::Cleared));
    }

    async fn set_disconnected(&self) {
        self.state.lock().await.status = ConnectionStatus::Disconnected;
        self.emit_status().await;
    }

    async fn emit_status(&self) {
        let (status, attempt) = {
            let state = self.state.lock().await;
            (state.status, state.attempt)
        };
        let _ = self
            .event_bus
            .connection
            .send(Arc::new(ConnectionStatusChanged { status, attempt }));
    }
}
