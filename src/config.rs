use std::time::Duration;

/// Configuration for the connection manager.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// WebSocket URL of the signaling relay.
    pub url: String,
    /// How many reconnect attempts are scheduled before giving up.
    pub max_reconnect_attempts: u32,
    /// Deadline for a single transport connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:5000/ws".to_string(),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// Configuration for the call session controller.
#[derive(Clone, Debug)]
pub struct CallConfig {
    /// How long a Dialing or Ringing session waits for an answer.
    pub ring_timeout: Duration,
    /// How long an ended session lingers (for UI display) before the
    /// controller returns to idle.
    pub ended_linger: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(30),
            ended_linger: Duration::from_secs(2),
        }
    }
}
