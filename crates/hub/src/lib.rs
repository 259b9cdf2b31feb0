//! Server side of busrelay.
//!
//! Accepts telemetry over WebSocket and REST, keeps the last readings in a
//! bounded history, and broadcasts the latest state to every connected
//! viewer through a single [`BroadcastHub`] worker.

mod connection;
pub mod history;
pub mod hub;
mod server;

pub use connection::PingSettings;
pub use history::HistoryStore;
pub use hub::{Accepted, BroadcastHub, Frame};
pub use server::{RelayServer, ServerConfig};

/// Frames a subscriber may have pending before it counts as unresponsive.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Payloads waiting for fan-out. The newest is dropped when full.
pub const BROADCAST_QUEUE: usize = 256;

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
