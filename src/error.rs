use thiserror::Error;

/// Errors surfaced by the connection manager.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("reconnect budget exhausted after {attempts} attempts")]
    PersistentDisconnect { attempts: u32 },

    #[error("not connected to the relay")]
    NotConnected,

    #[error("connection manager is already running")]
    AlreadyRunning,

    #[error("failed to encode signaling message: {0}")]
    Encode(#[from] serde_json::Error),
}
