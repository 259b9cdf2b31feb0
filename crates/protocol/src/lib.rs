//! Shared types for the busrelay collector and server.
//!
//! - [`record`]: the measurement snapshot and its timestamped form
//! - [`parser`]: turns ESP32 serial lines into readings
//! - [`message`]: JSON frames exchanged over the WebSocket link

pub mod constants;
pub mod message;
pub mod parser;
pub mod record;

pub use message::{Batch, InboundMessage, Payload, UplinkMessage};
pub use parser::{ParseError, parse_line};
pub use record::{
    BuzzerState, SensorReading, TelemetryRecord, UnknownBuzzerState, ValidationError,
    unix_timestamp,
};
