use std::time::Duration;

/// Number of records retained for the `GET /api/data` history endpoint.
pub const HISTORY_CAPACITY: usize = 100;

/// How often each side of a WebSocket link sends a ping.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(10);

/// How long to wait for a pong after a ping before declaring the peer dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(5);

/// Time allowed for a single frame to be written before the link is
/// considered stalled.
pub const WS_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed for the TCP + WebSocket handshake.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum accepted text frame size (1 MB). Telemetry frames are tiny;
/// anything larger is a misbehaving peer.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Value of the `type` field that marks a batch frame.
pub const BATCH_TYPE: &str = "batch";
