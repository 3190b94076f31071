//! Call-related error types.

use crate::error::ConnectionError;
use crate::media::MediaError;
use crate::peer::PeerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("another call session is already active")]
    SessionAlreadyActive,

    #[error("no active call session")]
    NoActiveSession,

    #[error(transparent)]
    MediaAccessDenied(#[from] MediaError),

    #[error(transparent)]
    PeerNegotiation(#[from] PeerError),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("call controller is already running")]
    AlreadyRunning,
}
