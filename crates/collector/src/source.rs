//! Record sources: where the collector gets its readings from.

use std::io::{self, Read};
use std::time::Duration;

use tracing::{info, warn};

use busrelay_protocol::parser::parse_reading;
use busrelay_protocol::{ParseError, SensorReading};

/// Longest line kept while waiting for its newline.
const MAX_LINE_LEN: usize = 4096;

/// Upper bound for a single read from the port.
const READ_CHUNK: usize = 1024;

/// Errors from a [`RecordSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("malformed line {line:?}: {source}")]
    Malformed {
        line: String,
        #[source]
        source: ParseError,
    },
}

/// Produces at most one reading per poll.
///
/// `poll` must not block: `Ok(None)` means nothing complete arrived yet.
pub trait RecordSource: Send {
    fn poll(&mut self) -> Result<Option<SensorReading>, SourceError>;
}

/// Splits a byte stream into trimmed, non-empty text lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_LINE_LEN && !self.pending.contains(&b'\n') {
            warn!(len = self.pending.len(), "discarding overlong serial line");
            self.pending.clear();
        }
    }

    /// Next complete line, decoded lossily. Blank lines are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    pub fn has_line(&self) -> bool {
        self.pending.contains(&b'\n')
    }

    /// Bytes received that do not yet form a full line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Serial connection settings.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Time given to the microcontroller to reboot after the port opens.
    pub settle_delay: Duration,
}

/// Reads ESP32 lines from a serial port.
pub struct SerialSource {
    port: Box<dyn serialport::SerialPort>,
    lines: LineBuffer,
}

impl SerialSource {
    /// Opens the port and waits for the device to settle.
    ///
    /// Failing to open the port is fatal for the collector.
    pub async fn open(settings: &SerialSettings) -> Result<Self, SourceError> {
        let port = serialport::new(&settings.path, settings.baud_rate)
            .timeout(Duration::from_millis(10))
            .open()?;
        info!(
            port = %settings.path,
            baud = settings.baud_rate,
            "serial port opened"
        );

        if !settings.settle_delay.is_zero() {
            tokio::time::sleep(settings.settle_delay).await;
        }

        Ok(Self {
            port,
            lines: LineBuffer::new(),
        })
    }

    fn fill(&mut self) -> Result<(), SourceError> {
        let waiting = self.port.bytes_to_read()? as usize;
        if waiting == 0 {
            return Ok(());
        }

        let mut buf = vec![0u8; waiting.min(READ_CHUNK)];
        match self.port.read(&mut buf) {
            Ok(n) => self.lines.push(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

impl RecordSource for SerialSource {
    fn poll(&mut self) -> Result<Option<SensorReading>, SourceError> {
        if !self.lines.has_line() {
            self.fill()?;
        }
        match self.lines.next_line() {
            Some(line) => parse_into_reading(line),
            None => Ok(None),
        }
    }
}

fn parse_into_reading(line: String) -> Result<Option<SensorReading>, SourceError> {
    parse_reading(&line)
        .map(Some)
        .map_err(|source| SourceError::Malformed { line, source })
}

/// Lines from memory; used by tests and for replaying captures.
pub struct ScriptedSource {
    lines: std::collections::VecDeque<Option<String>>,
}

impl ScriptedSource {
    /// Each entry is one poll; `None` is a tick without data.
    pub fn new<I, S>(polls: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            lines: polls.into_iter().map(|p| p.map(Into::into)).collect(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.lines.is_empty()
    }
}

impl RecordSource for ScriptedSource {
    fn poll(&mut self) -> Result<Option<SensorReading>, SourceError> {
        match self.lines.pop_front().flatten() {
            Some(line) => parse_into_reading(line),
            None => Ok(None),
        }
    }
}
