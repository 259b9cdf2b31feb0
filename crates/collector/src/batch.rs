//! Batching buffer between the record source and the uplink.
//!
//! Records accumulate until the batch is full, the batch timeout has
//! passed since the last successful flush, or a flush is forced. The
//! buffer is only cleared once the uplink accepted the batch; a failed
//! send keeps every record for the next attempt (at-least-once).

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use busrelay_protocol::{Batch, SensorReading, TelemetryRecord, UplinkMessage, unix_timestamp};
use busrelay_uplink::{Uplink, UplinkError};

/// Records kept while the server is unreachable. Older ones are dropped
/// beyond this.
pub const MAX_BUFFERED: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// When off, every record goes out on its own as soon as it is offered.
    pub enabled: bool,
    pub size: usize,
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 5,
            timeout: Duration::from_secs(2),
        }
    }
}

/// What a flush attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// This many records reached the uplink.
    Sent(usize),
    /// The send failed; this many records are still buffered.
    Retained(usize),
    /// Unbatched send failed and the record was discarded.
    Dropped(usize),
    /// Nothing was due.
    Idle,
}

pub struct BatchBuffer {
    config: BatchConfig,
    records: VecDeque<TelemetryRecord>,
    last_flush: Instant,
}

impl BatchBuffer {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            records: VecDeque::new(),
            last_flush: Instant::now(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stamps `reading` with the current time and queues it, flushing if a
    /// threshold is met.
    pub async fn offer<U>(&mut self, uplink: &mut U, reading: SensorReading) -> FlushOutcome
    where
        U: Uplink + ?Sized,
    {
        let record = reading.stamp_now();

        if !self.config.enabled {
            let message = UplinkMessage::Single(record);
            return match uplink.send(&message).await {
                Ok(()) => FlushOutcome::Sent(1),
                Err(e) => {
                    log_send_failure(&e, 1, "dropping record");
                    FlushOutcome::Dropped(1)
                }
            };
        }

        if self.records.len() >= MAX_BUFFERED {
            warn!(limit = MAX_BUFFERED, "batch buffer full, dropping oldest record");
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.flush(uplink, false).await
    }

    /// Sends the buffered records if forced or a threshold is met.
    /// An empty buffer is never sent.
    pub async fn flush<U>(&mut self, uplink: &mut U, force: bool) -> FlushOutcome
    where
        U: Uplink + ?Sized,
    {
        if self.records.is_empty() {
            return FlushOutcome::Idle;
        }
        let due = force
            || self.records.len() >= self.config.size
            || self.last_flush.elapsed() >= self.config.timeout;
        if !due {
            return FlushOutcome::Idle;
        }

        let count = self.records.len();
        let message = UplinkMessage::Batch(Batch::new(
            self.records.iter().cloned().collect(),
            unix_timestamp(),
        ));
        match uplink.send(&message).await {
            Ok(()) => {
                debug!(count, "batch sent");
                self.records.clear();
                self.last_flush = Instant::now();
                FlushOutcome::Sent(count)
            }
            Err(e) => {
                log_send_failure(&e, count, "keeping batch for retry");
                FlushOutcome::Retained(count)
            }
        }
    }

    /// Time-based check, run once per collector tick.
    pub async fn tick<U>(&mut self, uplink: &mut U) -> FlushOutcome
    where
        U: Uplink + ?Sized,
    {
        self.flush(uplink, false).await
    }
}

fn log_send_failure(error: &UplinkError, count: usize, action: &str) {
    if matches!(error, UplinkError::BackingOff { .. }) {
        debug!(count, error = %error, "{action}");
    } else {
        warn!(count, error = %error, "{action}");
    }
}
