//! Shared test harness: mock media/peer-transport capabilities and an
//! in-process relay that routes signaling between memory transports.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ringline::calls::CallController;
use ringline::config::{CallConfig, ConnectionConfig};
use ringline::connection::ConnectionManager;
use ringline::error::ConnectionError;
use ringline::media::{MediaDevices, MediaError, MediaHandle};
use ringline::peer::{
    NegotiationPayload, PeerError, PeerTransport, PeerTransportEvent, PeerTransportFactory,
};
use ringline::signaling::{ClientMessage, ServerMessage};
use ringline::transport::memory::{MemoryEndpoint, MemoryTransportFactory};
use ringline::transport::{DisconnectReason, TransportEvent};
use ringline::types::call::CallMode;
use ringline::types::events::EventBus;
use ringline::types::peer::PeerId;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds, failing the test after 60 virtual seconds.
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        while !cond().await {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not met in time")
}

// ---------------------------------------------------------------- media

/// Media capability that counts acquisitions and releases.
#[derive(Default)]
pub struct MockMedia {
    next_id: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    deny: AtomicBool,
}

impl MockMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_access(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Handles currently held by the code under test.
    pub fn live_handles(&self) -> u64 {
        self.acquired() - self.released()
    }
}

#[async_trait]
impl MediaDevices for MockMedia {
    async fn acquire(&self, mode: CallMode) -> Result<MediaHandle, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::AccessDenied("permission denied".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MediaHandle::new(id, mode))
    }

    async fn release(&self, _handle: MediaHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ------------------------------------------------------- peer transport

pub struct MockPeerTransport {
    destroyed: AtomicBool,
    destroy_count: Arc<AtomicU64>,
    // Dropped on destroy so the event channel closes, as the trait demands.
    events_tx: Mutex<Option<mpsc::Sender<PeerTransportEvent>>>,
}

#[async_trait]
impl PeerTransport for MockPeerTransport {
    async fn create_offer(&self) -> Result<NegotiationPayload, PeerError> {
        Ok(NegotiationPayload::new(json!({"sdp": "offer"})))
    }

    async fn create_answer(
        &self,
        remote: &NegotiationPayload,
    ) -> Result<NegotiationPayload, PeerError> {
        Ok(NegotiationPayload::new(json!({
            "sdp": "answer",
            "in_reply_to": remote.clone().into_inner(),
        })))
    }

    async fn apply_remote(&self, _payload: &NegotiationPayload) -> Result<(), PeerError> {
        Ok(())
    }

    async fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.destroy_count.fetch_add(1, Ordering::SeqCst);
        }
        self.events_tx.lock().await.take();
    }
}

/// Factory tracking every transport it hands out.
#[derive(Default)]
pub struct MockPeerFactory {
    created: AtomicU64,
    destroy_count: Arc<AtomicU64>,
    fail_create: AtomicBool,
    event_senders: Mutex<Vec<mpsc::WeakSender<PeerTransportEvent>>>,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> u64 {
        self.destroy_count.load(Ordering::SeqCst)
    }

    /// Event sender of the most recently created transport, if it is still
    /// alive. Lets tests inject remote-media/closed/error events.
    pub async fn last_events(&self) -> Option<mpsc::Sender<PeerTransportEvent>> {
        self.event_senders
            .lock()
            .await
            .last()
            .and_then(|weak| weak.upgrade())
    }
}

#[async_trait]
impl PeerTransportFactory for MockPeerFactory {
    async fn create(
        &self,
        _local_media: &MediaHandle,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<PeerTransportEvent>), PeerError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PeerError::Negotiation("simulated create failure".to_string()));
        }
        let (tx, rx) = mpsc::channel(16);
        self.created.fetch_add(1, Ordering::SeqCst);
        self.event_senders.lock().await.push(tx.downgrade());
        let transport = Arc::new(MockPeerTransport {
            destroyed: AtomicBool::new(false),
            destroy_count: Arc::clone(&self.destroy_count),
            events_tx: Mutex::new(Some(tx)),
        });
        Ok((transport, rx))
    }
}

// ----------------------------------------------------------------- relay

/// In-process signaling relay: registers clients, tracks presence, and
/// routes call signaling between them.
pub struct TestRelay {
    clients: Mutex<HashMap<PeerId, mpsc::Sender<TransportEvent>>>,
    registers: Mutex<Vec<PeerId>>,
}

impl TestRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
            registers: Mutex::new(Vec::new()),
        })
    }

    /// A transport factory whose connections terminate at this relay.
    pub fn factory(self: &Arc<Self>) -> MemoryTransportFactory {
        let (factory, mut endpoints) = MemoryTransportFactory::new();
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(endpoint) = endpoints.recv().await {
                tokio::spawn(Arc::clone(&relay).serve(endpoint));
            }
        });
        factory
    }

    pub async fn is_registered(&self, peer: &PeerId) -> bool {
        self.clients.lock().await.contains_key(peer)
    }

    /// All register messages seen, in order.
    pub async fn register_log(&self) -> Vec<PeerId> {
        self.registers.lock().await.clone()
    }

    /// Drop a client's channel from the relay side.
    pub async fn kick(&self, peer: &PeerId, reason: DisconnectReason) {
        if let Some(tx) = self.clients.lock().await.get(peer).cloned() {
            let _ = tx.send(TransportEvent::Disconnected { reason }).await;
        }
    }

    async fn serve(self: Arc<Self>, mut endpoint: MemoryEndpoint) {
        let mut me: Option<PeerId> = None;

        while let Some(frame) = endpoint.outbound.recv().await {
            let message: ClientMessage =
                serde_json::from_slice(&frame).expect("client sent malformed frame");
            match message {
                ClientMessage::Register { peer_id } => {
                    self.registers.lock().await.push(peer_id.clone());
                    let mut clients = self.clients.lock().await;
                    for tx in clients.values() {
                        send_server(tx, &ServerMessage::PresenceJoin {
                            peer_id: peer_id.clone(),
                        })
                        .await;
                    }
                    clients.insert(peer_id.clone(), endpoint.events.clone());
                    let peers: Vec<PeerId> = clients.keys().cloned().collect();
                    send_server(&endpoint.events, &ServerMessage::PresenceSnapshot { peers })
                        .await;
                    me = Some(peer_id);
                }
                ClientMessage::CallOffer {
                    to,
                    from,
                    mode,
                    payload,
                } => {
                    self.route(&to, ServerMessage::CallOffer {
                        from,
                        mode,
                        payload,
                    })
                    .await;
                }
                ClientMessage::CallAnswer { to, from, payload } => {
                    self.route(&to, ServerMessage::CallAnswer { from, payload })
                        .await;
                }
                ClientMessage::CallEnd { to, from } => {
                    self.route(&to, ServerMessage::CallEnd { from, reason: None })
                        .await;
                }
            }
        }

        // Transport gone: unregister (unless a newer connection took over
        // the id) and tell everyone else.
        if let Some(peer_id) = me {
            let mut clients = self.clients.lock().await;
            let stale = clients
                .get(&peer_id)
                .map(|tx| tx.same_channel(&endpoint.events))
                .unwrap_or(false);
            if stale {
                clients.remove(&peer_id);
                for tx in clients.values() {
                    send_server(tx, &ServerMessage::PresenceLeave {
                        peer_id: peer_id.clone(),
                    })
                    .await;
                }
            }
        }
    }

    async fn route(&self, to: &PeerId, message: ServerMessage) {
        let tx = self.clients.lock().await.get(to).cloned();
        match tx {
            Some(tx) => send_server(&tx, &message).await,
            None => log::debug!(target: "TestRelay", "No route to {to}; dropping {message:?}"),
        }
    }
}

async fn send_server(tx: &mpsc::Sender<TransportEvent>, message: &ServerMessage) {
    let frame = message.to_frame().expect("server message serializes");
    let _ = tx
        .send(TransportEvent::FrameReceived(Bytes::from(frame)))
        .await;
}

// ----------------------------------------------------------- full client

/// A fully wired client stack talking to a [`TestRelay`].
pub struct TestClient {
    pub id: PeerId,
    pub bus: Arc<EventBus>,
    pub manager: Arc<ConnectionManager>,
    pub controller: Arc<CallController>,
    pub media: Arc<MockMedia>,
    pub peers: Arc<MockPeerFactory>,
    pub run_handle: JoinHandle<Result<(), ConnectionError>>,
}

pub async fn connect_client(relay: &Arc<TestRelay>, id: &str) -> TestClient {
    connect_client_with(relay, id, CallConfig::default()).await
}

pub async fn connect_client_with(
    relay: &Arc<TestRelay>,
    id: &str,
    call_config: CallConfig,
) -> TestClient {
    let id: PeerId = id.into();
    let bus = Arc::new(EventBus::new());
    let factory = Arc::new(relay.factory());
    let manager = ConnectionManager::new(ConnectionConfig::default(), factory, Arc::clone(&bus));
    let media = MockMedia::new();
    let peers = MockPeerFactory::new();
    let controller = CallController::new(
        id.clone(),
        call_config,
        Arc::clone(&manager),
        media.clone() as Arc<dyn MediaDevices>,
        peers.clone() as Arc<dyn PeerTransportFactory>,
    );
    controller.start().await.expect("controller starts once");

    let run_handle = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run().await })
    };

    manager.register(id.clone()).await.expect("register");
    {
        let relay = Arc::clone(relay);
        let id = id.clone();
        wait_until(|| {
            let relay = Arc::clone(&relay);
            let id = id.clone();
            async move { relay.is_registered(&id).await }
        })
        .await;
    }

    TestClient {
        id,
        bus,
        manager,
        controller,
        media,
        peers,
        run_handle,
    }
}
