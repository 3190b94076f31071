//! Transport abstraction for the relay channel.
//!
//! The connection manager owns exactly one [`Transport`] at a time and is
//! the only component allowed to write to it. Concrete implementations are
//! the production WebSocket transport ([`crate::websocket`]) and an
//! in-process pair ([`memory`]) for tests and local development.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why the transport was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The relay closed the channel on purpose. No reconnect is attempted.
    RemoteClosed,
    /// A read or protocol error tore the connection down.
    Error(String),
    /// The byte stream ended without a close handshake.
    StreamEnded,
}

impl DisconnectReason {
    /// True when the loss was a deliberate, remote-initiated close.
    pub fn is_intentional(&self) -> bool {
        matches!(self, DisconnectReason::RemoteClosed)
    }
}

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A signaling frame has been received from the relay.
    FrameReceived(Bytes),
    /// The connection was lost.
    Disconnected { reason: DisconnectReason },
}

/// Represents an active connection to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a signaling frame to the relay.
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
///
/// One instance is created per connect attempt; the previous instance is
/// discarded before a new one is requested.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

/// In-process transport, connected to a [`memory::MemoryEndpoint`] instead of
/// a network socket. Used by the test suite and useful for wiring a local
/// relay into integration tests of the presentation tier.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const EVENT_CHANNEL_CAPACITY: usize = 100;

    /// The far side of a memory transport, handed out by the factory for
    /// every successful connect.
    ///
    /// `outbound` yields the frames the client sent; pushing into `events`
    /// delivers frames (or a disconnect) to the client. Dropping `events`
    /// reads to the client as the stream ending abnormally.
    pub struct MemoryEndpoint {
        pub outbound: mpsc::Receiver<Bytes>,
        pub events: mpsc::Sender<TransportEvent>,
    }

    pub struct MemoryTransport {
        tx: mpsc::Sender<Bytes>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
            if self.closed.load(Ordering::Acquire) {
                return Err(anyhow::anyhow!("transport is closed"));
            }
            self.tx
                .send(Bytes::copy_from_slice(frame))
                .await
                .map_err(|_| anyhow::anyhow!("endpoint dropped"))
        }

        async fn disconnect(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    /// Factory producing paired memory transports.
    ///
    /// Each successful `create_transport` call publishes a fresh
    /// [`MemoryEndpoint`] on the receiver returned by [`MemoryTransportFactory::new`].
    pub struct MemoryTransportFactory {
        endpoints: mpsc::Sender<MemoryEndpoint>,
        fail_remaining: AtomicU32,
        attempts: AtomicU32,
    }

    impl MemoryTransportFactory {
        pub fn new() -> (Self, mpsc::Receiver<MemoryEndpoint>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Self {
                    endpoints: tx,
                    fail_remaining: AtomicU32::new(0),
                    attempts: AtomicU32::new(0),
                },
                rx,
            )
        }

        /// Make the next `n` connect attempts fail.
        pub fn fail_next(&self, n: u32) {
            self.fail_remaining.store(n, Ordering::Release);
        }

        /// Total connect attempts seen so far (including failed ones).
        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::Acquire)
        }
    }

    #[async_trait]
    impl TransportFactory for MemoryTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            self.attempts.fetch_add(1, Ordering::AcqRel);

            if self
                .fail_remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(anyhow::anyhow!("simulated connect failure"));
            }

            let (frame_tx, frame_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

            self.endpoints
                .send(MemoryEndpoint {
                    outbound: frame_rx,
                    events: event_tx.clone(),
                })
                .await
                .map_err(|_| anyhow::anyhow!("no endpoint listener"))?;

            let _ = event_tx.send(TransportEvent::Connected).await;

            Ok((
                Arc::new(MemoryTransport {
                    tx: frame_tx,
                    closed: AtomicBool::new(false),
                }),
                event_rx,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTransportFactory;
    use super::*;

    #[tokio::test]
    async fn memory_transport_delivers_frames_to_endpoint() {
        let (factory, mut endpoints) = MemoryTransportFactory::new();
        let (transport, mut events) = factory.create_transport().await.unwrap();
        let mut endpoint = endpoints.recv().await.unwrap();

        assert!(matches!(events.recv().await, Some(TransportEvent::Connected)));

        transport.send_frame(b"hello").await.unwrap();
        let frame = endpoint.outbound.recv().await.unwrap();
        assert_eq!(&frame[..], b"hello");

        transport.disconnect().await;
        assert!(transport.send_frame(b"again").await.is_err());
    }

    #[tokio::test]
    async fn memory_factory_simulates_connect_failures() {
        let (factory, _endpoints) = MemoryTransportFactory::new();
        factory.fail_next(2);

        assert!(factory.create_transport().await.is_err());
        assert!(factory.create_transport().await.is_err());
        assert!(factory.create_transport().await.is_ok());
        assert_eq!(factory.attempts(), 3);
    }
}
