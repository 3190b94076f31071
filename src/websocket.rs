//! Production WebSocket transport for the relay channel.

use crate::config::ConnectionConfig;
use crate::transport::{DisconnectReason, Transport, TransportEvent, TransportFactory};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;
const FRAME_MAX_SIZE: usize = 2 << 20;

/// WebSocket transport carrying one signaling frame per binary message.
pub struct WebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;

        if frame.len() >= FRAME_MAX_SIZE {
            return Err(anyhow::anyhow!(
                "frame is too large (max: {}, got: {})",
                FRAME_MAX_SIZE,
                frame.len()
            ));
        }

        debug!(target: "Transport", "--> Sending frame: {} bytes", frame.len());
        sink.send(Message::binary(Bytes::copy_from_slice(frame)))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let _ = sink.close().await;
        }
    }
}

/// Factory for WebSocket transports pointed at the configured relay URL.
pub struct WebSocketTransportFactory {
    config: ConnectionConfig,
}

impl WebSocketTransportFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!(target: "Transport", "Dialing {}", self.config.url);

        let connect = connect_async(self.config.url.as_str());
        let (ws, _response) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| anyhow::anyhow!("connect timed out"))?
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = ws.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(read_pump(stream, event_tx.clone()));

        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((
            Arc::new(WebSocketTransport {
                ws_sink: Mutex::new(Some(sink)),
            }),
            event_rx,
        ))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                debug!(target: "Transport", "<-- Received frame: {} bytes", data.len());
                if event_tx
                    .send(TransportEvent::FrameReceived(data))
                    .await
                    .is_err()
                {
                    trace!(target: "Transport", "Event receiver dropped, closing read pump");
                    return;
                }
            }
            Some(Ok(Message::Text(text))) => {
                // Tolerate relays that speak text frames.
                let data = Bytes::copy_from_slice(text.as_bytes());
                if event_tx
                    .send(TransportEvent::FrameReceived(data))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                trace!(target: "Transport", "Received close frame: {:?}", frame);
                break DisconnectReason::RemoteClosed;
            }
            Some(Ok(_)) => {} // ping/pong
            Some(Err(e)) => {
                error!(target: "Transport", "Error reading from websocket: {e}");
                break DisconnectReason::Error(e.to_string());
            }
            None => {
                trace!(target: "Transport", "Websocket stream ended");
                break DisconnectReason::StreamEnded;
            }
        }
    };

    let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
}
