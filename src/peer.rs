//! Peer transport capability boundary (WebRTC-equivalent).

use crate::media::MediaHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque signaling blob exchanged between peer transports (offer/answer).
///
/// The session layer never inspects the contents; it only ferries them
/// through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NegotiationPayload(serde_json::Value);

impl NegotiationPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer negotiation failed: {0}")]
    Negotiation(String),

    #[error("peer transport already destroyed")]
    Destroyed,
}

/// Events reported by a peer transport instance.
#[derive(Debug)]
pub enum PeerTransportEvent {
    /// Inbound media tracks became available.
    RemoteMedia(MediaHandle),
    /// The media path is established.
    Connected,
    /// The media path was closed by the remote side.
    Closed,
    /// The transport failed.
    Error(String),
}

/// One point-to-point media transport, created fresh per call session.
///
/// `destroy` is idempotent and closes the event channel returned by the
/// factory, so pump tasks draining it terminate on their own.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Produce the outbound negotiation payload for an outgoing call.
    async fn create_offer(&self) -> Result<NegotiationPayload, PeerError>;

    /// Apply the caller's payload and produce the answering payload.
    async fn create_answer(
        &self,
        remote: &NegotiationPayload,
    ) -> Result<NegotiationPayload, PeerError>;

    /// Apply the remote answer to an offer this transport created.
    async fn apply_remote(&self, payload: &NegotiationPayload) -> Result<(), PeerError>;

    /// Tear the transport down, releasing its resources.
    async fn destroy(&self);
}

/// Creates peer transports bound to already-acquired local media.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    async fn create(
        &self,
        local_media: &MediaHandle,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<PeerTransportEvent>), PeerError>;
}
