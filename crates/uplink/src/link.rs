//! Connection manager owning the collector's single uplink session.
//!
//! The manager drives the [`ConnectionState`] machine, gates reconnects with
//! [`Backoff`], and never retries a payload on its own: a failed send is
//! reported to the caller, which decides whether to keep the data.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use busrelay_protocol::UplinkMessage;

use crate::backoff::Backoff;
use crate::error::UplinkError;
use crate::types::{ConnectionState, LinkConfig};
use crate::ws_client::WsClient;

/// Boxed future returned by [`Uplink`] methods.
pub type LinkFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything the collector can push telemetry through.
pub trait Uplink: Send {
    fn state(&mut self) -> ConnectionState;

    /// One connect attempt, unless a backoff period is still running.
    fn connect_once(&mut self) -> LinkFuture<'_, Result<(), UplinkError>>;

    /// Retries until connected or `cancel` fires.
    fn connect<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> LinkFuture<'a, Result<(), UplinkError>>;

    /// Sends one frame, connecting first if needed.
    fn send<'a>(&'a mut self, message: &'a UplinkMessage)
    -> LinkFuture<'a, Result<(), UplinkError>>;

    fn close(&mut self) -> LinkFuture<'_, ()>;
}

/// WebSocket-backed [`Uplink`] with exponential backoff.
pub struct UplinkManager {
    config: LinkConfig,
    client: Option<WsClient>,
    state: ConnectionState,
    backoff: Backoff,
}

impl UplinkManager {
    pub fn new(config: LinkConfig) -> Self {
        let backoff = Backoff::new(config.reconnect.clone());
        Self {
            config,
            client: None,
            state: ConnectionState::Disconnected,
            backoff,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current state, after accounting for a session that died on its own.
    pub fn state(&mut self) -> ConnectionState {
        self.refresh();
        self.state
    }

    /// Notices a session killed by the pumps (pong timeout, write error,
    /// server hangup) and moves to `Disconnected`.
    pub fn refresh(&mut self) {
        if self.state == ConnectionState::Connected
            && !self.client.as_ref().is_some_and(WsClient::is_alive)
        {
            warn!(url = %self.config.url, "uplink connection lost");
            self.teardown();
        }
    }

    pub async fn connect_once(&mut self) -> Result<(), UplinkError> {
        self.refresh();
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        if let Some(retry_in) = self.backoff.remaining() {
            return Err(UplinkError::BackingOff { retry_in });
        }

        self.state = ConnectionState::Connecting;
        info!(url = %self.config.url, attempt = self.backoff.attempt(), "connecting to server");

        match WsClient::connect(&self.config).await {
            Ok(client) => {
                self.client = Some(client);
                self.state = ConnectionState::Connected;
                self.backoff.reset();
                info!(url = %self.config.url, "connected to server");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                let delay = self.backoff.fail();
                warn!(
                    url = %self.config.url,
                    attempt = self.backoff.attempt(),
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "connect failed, backing off"
                );
                Err(e)
            }
        }
    }

    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), UplinkError> {
        loop {
            if cancel.is_cancelled() {
                return Err(UplinkError::Cancelled);
            }
            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(UplinkError::BackingOff { retry_in }) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(UplinkError::Cancelled),
                        _ = tokio::time::sleep(retry_in) => {}
                    }
                }
                // Already logged; the backoff gate decides when to retry.
                Err(_) => {}
            }
        }
    }

    pub async fn send(&mut self, message: &UplinkMessage) -> Result<(), UplinkError> {
        let text = message.to_json()?;

        match self.connect_once().await {
            Ok(()) => {}
            Err(e @ UplinkError::BackingOff { .. }) => {
                debug!(records = message.record_count(), error = %e, "not connected, dropping send");
                return Err(e);
            }
            Err(e) => {
                warn!(records = message.record_count(), error = %e, "not connected, dropping send");
                return Err(e);
            }
        }

        let Some(client) = self.client.as_ref() else {
            return Err(UplinkError::Closed);
        };

        let result = client.send_text(text).await;
        match result {
            Ok(()) => {
                debug!(records = message.record_count(), "sent");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "send failed, dropping connection");
                self.teardown();
                Err(e)
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            self.state = ConnectionState::Closing;
            client.close().await;
            info!(url = %self.config.url, "uplink closed");
        }
        self.state = ConnectionState::Disconnected;
    }

    fn teardown(&mut self) {
        self.client = None;
        self.state = ConnectionState::Disconnected;
    }
}

impl Uplink for UplinkManager {
    fn state(&mut self) -> ConnectionState {
        UplinkManager::state(self)
    }

    fn connect_once(&mut self) -> LinkFuture<'_, Result<(), UplinkError>> {
        Box::pin(UplinkManager::connect_once(self))
    }

    fn connect<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> LinkFuture<'a, Result<(), UplinkError>> {
        Box::pin(UplinkManager::connect(self, cancel))
    }

    fn send<'a>(
        &'a mut self,
        message: &'a UplinkMessage,
    ) -> LinkFuture<'a, Result<(), UplinkError>> {
        Box::pin(UplinkManager::send(self, message))
    }

    fn close(&mut self) -> LinkFuture<'_, ()> {
        Box::pin(UplinkManager::close(self))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use busrelay_protocol::SensorReading;
    use busrelay_protocol::record::BuzzerState;
    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite;

    fn reading() -> SensorReading {
        SensorReading {
            humidity: 60.0,
            temp_c: 25.0,
            temp_f: 77.0,
            passengers: 3,
            distance: 10.0,
            latitude: None,
            longitude: None,
            buzzer: BuzzerState::Off,
        }
    }

    async fn collecting_server() -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if let tungstenite::Message::Text(text) = msg {
                            let _ = tx.send(text.to_string()).await;
                        }
                    }
                });
            }
        });
        (format!("ws://{addr}/ws"), rx)
    }

    async fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/ws")
    }

    #[tokio::test]
    async fn send_connects_lazily() {
        let (url, mut received) = collecting_server().await;
        let mut uplink = UplinkManager::new(LinkConfig::new(url));
        assert_eq!(uplink.state(), ConnectionState::Disconnected);

        let msg = UplinkMessage::Single(reading().stamped(5.0));
        uplink.send(&msg).await.unwrap();
        assert_eq!(uplink.state(), ConnectionState::Connected);

        let text = received.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["humidity"], 60.0);
        assert_eq!(json["timestamp"], 5.0);
    }

    #[tokio::test]
    async fn unreachable_server_drops_send_and_backs_off() {
        let mut uplink = UplinkManager::new(LinkConfig::new(dead_url().await));
        let msg = UplinkMessage::Single(reading().stamped(1.0));

        assert!(matches!(uplink.send(&msg).await, Err(UplinkError::Ws(_))));
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
        assert_eq!(uplink.backoff.attempt(), 1);

        // The gate is closed, so the next send fails fast without connecting.
        match uplink.send(&msg).await {
            Err(UplinkError::BackingOff { retry_in }) => {
                assert!(retry_in <= Duration::from_millis(1100));
            }
            other => panic!("expected BackingOff, got {other:?}"),
        }
        assert_eq!(uplink.backoff.attempt(), 1);
    }

    #[tokio::test]
    async fn connect_gives_up_on_cancel() {
        let mut config = LinkConfig::new(dead_url().await);
        config.reconnect.base_delay = Duration::from_millis(20);
        config.reconnect.max_delay = Duration::from_millis(50);
        let mut uplink = UplinkManager::new(config);

        let cancel = CancellationToken::new();
        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            c.cancel();
        });

        let result = uplink.connect(&cancel).await;
        assert!(matches!(result, Err(UplinkError::Cancelled)));
        assert!(uplink.backoff.attempt() >= 2, "should have retried");
    }

    #[tokio::test]
    async fn success_resets_backoff() {
        let (url, _received) = collecting_server().await;
        let mut config = LinkConfig::new(url);
        config.reconnect.base_delay = Duration::from_millis(10);
        config.reconnect.jitter = 0.0;
        let mut uplink = UplinkManager::new(config);

        uplink.backoff.fail();
        assert_eq!(uplink.backoff.attempt(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        uplink.connect_once().await.unwrap();
        assert_eq!(uplink.backoff.attempt(), 0);
        assert!(uplink.backoff.remaining().is_none());
    }

    #[tokio::test]
    async fn server_hangup_is_noticed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let mut uplink = UplinkManager::new(LinkConfig::new(format!("ws://{addr}/ws")));
        uplink.connect_once().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while uplink.state() == ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("hangup should be detected");
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn close_returns_to_disconnected() {
        let (url, _received) = collecting_server().await;
        let mut uplink = UplinkManager::new(LinkConfig::new(url));
        uplink.connect_once().await.unwrap();
        uplink.close().await;
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
        assert!(uplink.client.is_none());
    }

    #[tokio::test]
    async fn next_send_reconnects_after_server_drops_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut received) = mpsc::channel::<String>(16);
        tokio::spawn(async move {
            // First session: take one frame, then hang up.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(tungstenite::Message::Text(text))) = ws.next().await {
                let _ = tx.send(text.to_string()).await;
            }
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let tungstenite::Message::Text(text) = msg {
                    let _ = tx.send(text.to_string()).await;
                }
            }
        });

        let timestamp_of = |text: String| {
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            json["timestamp"].as_f64()
        };

        let mut uplink = UplinkManager::new(LinkConfig::new(format!("ws://{addr}/ws")));
        uplink
            .send(&UplinkMessage::Single(reading().stamped(1.0)))
            .await
            .unwrap();
        assert_eq!(received.recv().await.map(timestamp_of), Some(Some(1.0)));

        tokio::time::timeout(Duration::from_secs(5), async {
            while uplink.state() == ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("dropped session should be noticed");

        uplink
            .send(&UplinkMessage::Single(reading().stamped(2.0)))
            .await
            .unwrap();
        assert_eq!(uplink.state(), ConnectionState::Connected);

        let second = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .expect("second frame should arrive");
        assert_eq!(second.map(timestamp_of), Some(Some(2.0)));
    }

    #[tokio::test]
    async fn stalled_write_tears_down_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Never read, so the client's socket buffers fill up.
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut config = LinkConfig::new(format!("ws://{addr}/ws"));
        config.write_timeout = Duration::from_millis(100);
        let mut uplink = UplinkManager::new(config);
        uplink.connect_once().await.unwrap();

        let records: Vec<_> = (0..5000).map(|n| reading().stamped(f64::from(n))).collect();
        let big = UplinkMessage::Batch(busrelay_protocol::Batch::new(records, 0.0));

        let mut failure = None;
        for _ in 0..200 {
            if let Err(e) = uplink.send(&big).await {
                failure = Some(e);
                break;
            }
        }

        assert!(
            matches!(failure, Some(UplinkError::WriteTimeout)),
            "expected a write timeout, got {failure:?}"
        );
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
        assert!(uplink.client.is_none());
    }
}
