//! Media device capability boundary.

use crate::types::call::CallMode;
use async_trait::async_trait;
use thiserror::Error;

/// Exclusively owned handle to a set of acquired media tracks.
///
/// Deliberately not `Clone`: the session that acquired the handle owns it,
/// and [`MediaDevices::release`] consumes it so a handle can only be
/// released once.
#[derive(Debug)]
pub struct MediaHandle {
    id: u64,
    mode: CallMode,
}

impl MediaHandle {
    pub fn new(id: u64, mode: CallMode) -> Self {
        Self { id, mode }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> CallMode {
        self.mode
    }

    pub fn has_video(&self) -> bool {
        self.mode.has_video()
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media access denied: {0}")]
    AccessDenied(String),

    #[error("no capture device available for {0:?}")]
    NoDevice(CallMode),
}

/// Access to the local microphone/camera.
///
/// `acquire` requests exactly the tracks `mode` needs (audio-only omits the
/// video track). It suspends until the platform grants or denies access and
/// must never block the runtime.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, mode: CallMode) -> Result<MediaHandle, MediaError>;

    /// Releases an acquired handle. Called exactly once per handle.
    async fn release(&self, handle: MediaHandle);
}
