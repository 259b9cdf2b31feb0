//! In-memory uplink for collector tests.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use busrelay_protocol::{SensorReading, UplinkMessage};
use busrelay_uplink::{ConnectionState, LinkFuture, Uplink, UplinkError};

use crate::source::{RecordSource, ScriptedSource, SourceError};

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub(crate) sent: Vec<UplinkMessage>,
    /// Number of upcoming sends that fail.
    pub(crate) fail_sends: usize,
    /// When set, connects never succeed.
    pub(crate) unreachable: bool,
    pub(crate) connected: bool,
    pub(crate) connect_calls: usize,
    pub(crate) closed: bool,
}

/// Records every frame; clones share state so tests can inspect it after
/// handing the uplink to a collector.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeUplink {
    pub(crate) inner: Arc<Mutex<FakeState>>,
}

impl FakeUplink {
    pub(crate) fn failing(count: usize) -> Self {
        let fake = Self::default();
        fake.inner.lock().unwrap().fail_sends = count;
        fake
    }

    pub(crate) fn unreachable() -> Self {
        let fake = Self::default();
        fake.inner.lock().unwrap().unreachable = true;
        fake
    }

    pub(crate) fn sent(&self) -> Vec<UplinkMessage> {
        self.inner.lock().unwrap().sent.clone()
    }

    fn try_connect(&self) -> Result<(), UplinkError> {
        let mut state = self.inner.lock().unwrap();
        state.connect_calls += 1;
        if state.unreachable {
            return Err(UplinkError::Closed);
        }
        state.connected = true;
        Ok(())
    }
}

impl Uplink for FakeUplink {
    fn state(&mut self) -> ConnectionState {
        if self.inner.lock().unwrap().connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn connect_once(&mut self) -> LinkFuture<'_, Result<(), UplinkError>> {
        Box::pin(async move { self.try_connect() })
    }

    fn connect<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> LinkFuture<'a, Result<(), UplinkError>> {
        Box::pin(async move {
            if self.try_connect().is_ok() {
                return Ok(());
            }
            cancel.cancelled().await;
            Err(UplinkError::Cancelled)
        })
    }

    fn send<'a>(
        &'a mut self,
        message: &'a UplinkMessage,
    ) -> LinkFuture<'a, Result<(), UplinkError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().unwrap();
            if state.unreachable {
                return Err(UplinkError::Closed);
            }
            if state.fail_sends > 0 {
                state.fail_sends -= 1;
                state.connected = false;
                return Err(UplinkError::WriteTimeout);
            }
            state.connected = true;
            state.sent.push(message.clone());
            Ok(())
        })
    }

    fn close(&mut self) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.inner.lock().unwrap();
            state.connected = false;
            state.closed = true;
        })
    }
}

/// Fails the first `failures` polls with an I/O error, then reads from
/// `then`.
pub(crate) struct FailingSource {
    failures: u32,
    then: ScriptedSource,
}

impl FailingSource {
    pub(crate) fn new(failures: u32, then: ScriptedSource) -> Self {
        Self { failures, then }
    }
}

impl RecordSource for FailingSource {
    fn poll(&mut self) -> Result<Option<SensorReading>, SourceError> {
        if self.failures > 0 {
            self.failures -= 1;
            let gone = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "port gone");
            return Err(gone.into());
        }
        self.then.poll()
    }
}
