//! The collector loop: source → batch buffer → uplink.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use busrelay_uplink::{Uplink, UplinkError};

use crate::batch::{BatchBuffer, BatchConfig, FlushOutcome};
use crate::source::{RecordSource, SourceError};

/// A source that keeps failing is reported at `warn` on the first failure
/// and then once per this many consecutive failures.
const SOURCE_FAILURE_WARN_EVERY: u64 = 1000;

/// Lifecycle of a [`Collector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Sleep between two polls of the source.
    pub poll_interval: Duration,
    /// Block startup until the server accepts a connection.
    pub wait_for_server: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            wait_for_server: false,
        }
    }
}

pub struct Collector<S, U> {
    source: S,
    uplink: U,
    buffer: BatchBuffer,
    config: CollectorConfig,
    state: CollectorState,
    source_failures: u64,
}

impl<S, U> Collector<S, U>
where
    S: RecordSource,
    U: Uplink,
{
    pub fn new(source: S, uplink: U, batch: BatchConfig, config: CollectorConfig) -> Self {
        Self {
            source,
            uplink,
            buffer: BatchBuffer::new(batch),
            config,
            state: CollectorState::Idle,
            source_failures: 0,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Records waiting for the next successful flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consecutive source read failures; reset by the next good poll.
    pub fn source_failures(&self) -> u64 {
        self.source_failures
    }

    pub fn into_parts(self) -> (S, U) {
        (self.source, self.uplink)
    }

    /// Runs until `cancel` fires, then flushes what is left and closes the
    /// uplink.
    pub async fn run(&mut self, cancel: CancellationToken) {
        if self.state != CollectorState::Idle {
            return;
        }

        if self.config.wait_for_server {
            info!("waiting for server before collecting");
            if let Err(UplinkError::Cancelled) = self.uplink.connect(&cancel).await {
                self.shutdown().await;
                return;
            }
        } else if let Err(e) = self.uplink.connect_once().await {
            // Not fatal: sends reconnect on their own.
            warn!(error = %e, "server not reachable yet, collecting anyway");
        }

        self.state = CollectorState::Running;
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            batching = self.buffer.config().enabled,
            "collector running"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.step().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// One iteration. Source failures are logged and skipped.
    async fn step(&mut self) {
        let polled = self.source.poll();
        if !matches!(polled, Err(SourceError::Io(_) | SourceError::Port(_))) {
            if self.source_failures > 0 {
                info!(failures = self.source_failures, "source recovered");
            }
            self.source_failures = 0;
        }

        let outcome = match polled {
            Ok(Some(reading)) => self.buffer.offer(&mut self.uplink, reading).await,
            Ok(None) => self.buffer.tick(&mut self.uplink).await,
            Err(SourceError::Malformed { line, source }) => {
                warn!(%line, error = %source, "skipping malformed line");
                self.buffer.tick(&mut self.uplink).await
            }
            Err(e) => {
                self.source_failures += 1;
                if warn_source_failure(self.source_failures) {
                    warn!(failures = self.source_failures, error = %e, "source read failed");
                } else {
                    debug!(failures = self.source_failures, error = %e, "source read failed");
                }
                self.buffer.tick(&mut self.uplink).await
            }
        };
        if let FlushOutcome::Sent(count) = outcome {
            debug!(count, "flushed");
        }
    }

    async fn shutdown(&mut self) {
        self.state = CollectorState::ShuttingDown;
        info!(buffered = self.buffer.len(), "collector shutting down");

        match self.buffer.flush(&mut self.uplink, true).await {
            FlushOutcome::Sent(count) => info!(count, "final batch sent"),
            FlushOutcome::Retained(count) | FlushOutcome::Dropped(count) => {
                warn!(count, "final flush failed, records lost")
            }
            FlushOutcome::Idle => {}
        }

        self.uplink.close().await;
        self.state = CollectorState::Stopped;
        info!("collector stopped");
    }
}

fn warn_source_failure(failures: u64) -> bool {
    failures == 1 || failures % SOURCE_FAILURE_WARN_EVERY == 0
}
