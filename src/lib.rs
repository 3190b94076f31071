// Core components
pub mod calls;
pub mod connection;
pub mod presence;

// Capability boundaries
pub mod media;
pub mod peer;

// Relay channel plumbing
pub mod signaling;
pub mod transport;
pub mod websocket;

pub mod config;
pub mod error;
pub mod types;

pub use calls::{CallController, CallError, CallSnapshot, CallState};
pub use config::{CallConfig, ConnectionConfig};
pub use connection::{ConnectionManager, ConnectionSnapshot, ConnectionStatus};
pub use error::ConnectionError;
pub use presence::PresenceRegistry;
pub use types::call::{CallId, CallMode, CallRole, EndReason};
pub use types::events::EventBus;
pub use types::peer::PeerId;
