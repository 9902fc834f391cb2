//! Room configuration.

use serde_json::{Map, Value};
use std::time::Duration;

/// Shallow JSON object describing what a user is doing right now.
pub type Presence = Map<String, Value>;

/// Minimum time between two outgoing flushes.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// Interval between `"ping"` frames while the socket is open.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for `"pong"` before treating the socket as dead.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(2);

/// Reconnect delays by retry count. The last value repeats.
pub const BACKOFF_DELAYS: [Duration; 7] = [
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
    Duration::from_millis(4000),
    Duration::from_millis(8000),
    Duration::from_millis(10000),
];

/// Close codes in this range are application-level rejections.
pub const REJECTION_CODES: std::ops::RangeInclusive<u16> = 4000..=4100;

#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Room name passed to the authenticator.
    pub room_id: String,
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:9090`.
    pub server_url: String,
    pub throttle: Duration,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub backoff: Vec<Duration>,
    pub initial_presence: Presence,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            room_id: String::new(),
            server_url: "ws://127.0.0.1:9090".to_string(),
            throttle: DEFAULT_THROTTLE,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            backoff: BACKOFF_DELAYS.to_vec(),
            initial_presence: Presence::new(),
        }
    }
}

impl RoomConfig {
    pub fn new(room_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt number `retry` (0-based).
    pub fn backoff_delay(&self, retry: usize) -> Duration {
        match self.backoff.len() {
            0 => Duration::ZERO,
            len => self.backoff[retry.min(len - 1)],
        }
    }

    pub fn socket_url(&self, token: &str) -> String {
        format!("{}/?token={}", self.server_url.trim_end_matches('/'), token)
    }
}
