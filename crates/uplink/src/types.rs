//! Public types for the uplink.

use std::time::Duration;

use busrelay_protocol::constants::{
    WS_CONNECT_TIMEOUT, WS_PING_PERIOD, WS_PONG_WAIT, WS_WRITE_WAIT,
};

/// Lifecycle of the uplink session.
///
/// `Disconnected → Connecting → Connected → Closing → Disconnected`.
/// A failed connect goes back to `Disconnected`; a write failure or a pong
/// timeout moves `Connected` straight to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Reconnection backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Relative jitter applied to each delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

/// Everything the uplink needs to reach the server.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8000/ws`.
    pub url: String,
    pub ping_interval: Duration,
    /// How long a pong may take to arrive after a ping.
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl LinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: WS_PING_PERIOD,
            ping_timeout: WS_PONG_WAIT,
            connect_timeout: WS_CONNECT_TIMEOUT,
            write_timeout: WS_WRITE_WAIT,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Silence longer than this means the server stopped answering pings.
    pub fn read_deadline(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}
