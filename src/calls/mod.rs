//! Call session control.
//!
//! One call attempt at a time, driven by a per-session state machine:
//!
//! - [`CallState`] & [`CallTransition`]: the closed state-variant type and
//!   its exhaustive transition table
//! - [`CallSession`]: the session entity owning media handles, the peer
//!   transport slot, and all per-call timers
//! - [`CallController`]: command surface (`dial`, `accept`, `reject`,
//!   `hang_up`, `minimize`, `maximize`) and the event loop consuming relay
//!   signaling, timer expirations, and peer-transport events
//!
//! Signaling travels through the connection manager; the actual media
//! exchange is delegated to the external peer-transport capability.

mod controller;
mod error;
mod session;
pub mod state;

pub use controller::CallController;
pub use error::CallError;
pub use session::{CallSession, CallSnapshot};
pub use state::{CallState, CallTransition, InvalidTransition};
