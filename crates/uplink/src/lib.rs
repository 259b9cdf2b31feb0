//! Uplink from the field collector to the busrelay server.
//!
//! Owns a single WebSocket session, reconnects with exponential backoff
//! and jitter, and keeps the session alive with ping/pong.

pub mod backoff;
pub mod error;
pub mod link;
mod pumps;
pub mod types;
pub mod ws_client;

pub use backoff::Backoff;
pub use error::UplinkError;
pub use link::{LinkFuture, Uplink, UplinkManager};
pub use types::{ConnectionState, LinkConfig, ReconnectConfig};
pub use ws_client::WsClient;
