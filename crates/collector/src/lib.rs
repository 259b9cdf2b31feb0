//! Field-side pipeline: read ESP32 lines, batch them, push them upstream.

pub mod batch;
pub mod collector;
pub mod source;

#[cfg(test)]
mod testing;

pub use batch::{BatchBuffer, BatchConfig, FlushOutcome};
pub use collector::{Collector, CollectorConfig, CollectorState};
pub use source::{LineBuffer, RecordSource, ScriptedSource, SerialSettings, SerialSource, SourceError};
