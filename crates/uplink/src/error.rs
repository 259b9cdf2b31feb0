use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors from the uplink.
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("connection closed")]
    Closed,

    #[error("backing off, next attempt in {retry_in:?}")]
    BackingOff { retry_in: Duration },

    #[error("cancelled")]
    Cancelled,
}
