//! The per-attempt call session entity.

use super::state::{CallState, CallTransition, InvalidTransition};
use crate::media::MediaHandle;
use crate::peer::{NegotiationPayload, PeerTransport};
use crate::types::call::{CallId, CallMode, CallRole};
use crate::types::peer::PeerId;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// One call attempt, from initiation to teardown.
///
/// Owns every per-call resource: the local/remote media handles, the peer
/// transport slot, and all timers. Timer handles live here so cancelling
/// them on a state transition can never leak into another session.
pub struct CallSession {
    pub id: CallId,
    pub role: CallRole,
    pub peer_id: PeerId,
    pub mode: CallMode,
    pub state: CallState,
    /// Presentation flag only; never affects state, media, or transport.
    pub minimized: bool,
    pub(crate) local_media: Option<MediaHandle>,
    pub(crate) remote_media: Option<MediaHandle>,
    pub(crate) remote_payload: Option<NegotiationPayload>,
    pub(crate) peer: Option<Arc<dyn PeerTransport>>,
    elapsed: Arc<AtomicU64>,
    pub(crate) ring_timer: Option<JoinHandle<()>>,
    elapsed_timer: Option<JoinHandle<()>>,
    pub(crate) linger_timer: Option<JoinHandle<()>>,
}

impl CallSession {
    pub(crate) fn outgoing(id: CallId, peer_id: PeerId, mode: CallMode) -> Self {
        Self::new(id, CallRole::Caller, peer_id, mode, CallState::dialing(), None)
    }

    pub(crate) fn incoming(
        id: CallId,
        peer_id: PeerId,
        mode: CallMode,
        offer: NegotiationPayload,
    ) -> Self {
        Self::new(
            id,
            CallRole::Callee,
            peer_id,
            mode,
            CallState::ringing(),
            Some(offer),
        )
    }

    fn new(
        id: CallId,
        role: CallRole,
        peer_id: PeerId,
        mode: CallMode,
        state: CallState,
        remote_payload: Option<NegotiationPayload>,
    ) -> Self {
        Self {
            id,
            role,
            peer_id,
            mode,
            state,
            minimized: false,
            local_media: None,
            remote_media: None,
            remote_payload,
            peer: None,
            elapsed: Arc::new(AtomicU64::new(0)),
            ring_timer: None,
            elapsed_timer: None,
            linger_timer: None,
        }
    }

    /// Seconds the call has been connected.
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.load(Ordering::Relaxed)
    }

    /// Elapsed time as `mm:ss` for display.
    pub fn format_elapsed(&self) -> String {
        format_duration(self.elapsed_secs())
    }

    pub(crate) fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        self.state = self.state.apply(&transition)?;
        Ok(())
    }

    /// Start the 1 Hz elapsed counter. Runs until cancelled; the task only
    /// touches the shared counter, so aborting it at any point is safe.
    pub(crate) fn start_elapsed_timer(&mut self) {
        let elapsed = Arc::clone(&self.elapsed);
        self.elapsed_timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                elapsed.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    /// Cancel the ring timer. Safe to call after it already fired.
    pub(crate) fn cancel_ring_timer(&mut self) {
        if let Some(handle) = self.ring_timer.take() {
            handle.abort();
        }
    }

    /// Cancel the ring and elapsed timers.
    pub(crate) fn cancel_timers(&mut self) {
        self.cancel_ring_timer();
        if let Some(handle) = self.elapsed_timer.take() {
            handle.abort();
        }
    }

    /// Tear down the peer transport. Idempotent: the slot is emptied first,
    /// so a second call (e.g. close event racing an explicit hang-up) is a
    /// no-op.
    pub(crate) async fn cleanup_peer(&mut self) {
        if let Some(peer) = self.peer.take() {
            peer.destroy().await;
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            id: self.id.clone(),
            role: self.role,
            peer_id: self.peer_id.clone(),
            mode: self.mode,
            state: self.state.clone(),
            minimized: self.minimized,
            elapsed_secs: self.elapsed_secs(),
            has_remote_media: self.remote_media.is_some(),
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.cancel_timers();
        if let Some(handle) = self.linger_timer.take() {
            handle.abort();
        }
    }
}

/// Read-only view of the active session for the presentation tier.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub id: CallId,
    pub role: CallRole,
    pub peer_id: PeerId,
    pub mode: CallMode,
    pub state: CallState,
    pub minimized: bool,
    pub elapsed_secs: u64,
    pub has_remote_media: bool,
}

impl CallSnapshot {
    /// Elapsed time as `mm:ss` for display.
    pub fn format_elapsed(&self) -> String {
        format_duration(self.elapsed_secs)
    }
}

fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(59), "00:59");
        assert_eq!(format_duration(65), "01:05");
        assert_eq!(format_duration(3600), "60:00");
    }
}
