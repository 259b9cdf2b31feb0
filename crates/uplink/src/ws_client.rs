//! A single WebSocket session to the server.
//!
//! The session runs three pumps: read (liveness), write (acked frames) and
//! ping (keepalive). Any pump failing cancels the session; callers notice
//! through [`WsClient::is_alive`].

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use busrelay_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::error::UplinkError;
use crate::pumps::Outbound;
use crate::types::LinkConfig;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket client connected to the server.
pub struct WsClient {
    write_tx: mpsc::Sender<Outbound>,
    write_timeout: Duration,
    read_handle: Option<JoinHandle<()>>,
    write_handle: Option<JoinHandle<()>>,
    ping_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Opens the socket and starts the pumps.
    pub async fn connect(config: &LinkConfig) -> Result<Self, UplinkError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let connecting =
            tokio_tungstenite::connect_async_with_config(config.url.as_str(), Some(ws_config), false);
        let (ws_stream, _) = tokio::time::timeout(config.connect_timeout, connecting)
            .await
            .map_err(|_| UplinkError::ConnectTimeout)??;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<Outbound>(64);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
        ));
        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            write_tx.clone(),
            config.read_deadline(),
            cancel.clone(),
        ));
        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            config.ping_interval,
            cancel.clone(),
        ));

        Ok(Self {
            write_tx,
            write_timeout: config.write_timeout,
            read_handle: Some(read_handle),
            write_handle: Some(write_handle),
            ping_handle: Some(ping_handle),
            cancel,
        })
    }

    /// Sends a text frame and waits until it has been written to the socket.
    ///
    /// A write that does not complete within the write timeout kills the
    /// session.
    pub async fn send_text(&self, text: String) -> Result<(), UplinkError> {
        if !self.is_alive() {
            return Err(UplinkError::Closed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let outbound = Outbound {
            frame: tungstenite::Message::Text(text.into()),
            ack: Some(ack_tx),
        };
        self.write_tx
            .send(outbound)
            .await
            .map_err(|_| UplinkError::Closed)?;

        match tokio::time::timeout(self.write_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(UplinkError::Ws(e)),
            Ok(Err(_)) => Err(UplinkError::Closed),
            Err(_) => {
                self.cancel.cancel();
                Err(UplinkError::WriteTimeout)
            }
        }
    }

    /// `false` once any pump has stopped.
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Gracefully closes the connection, giving the write pump a moment to
    /// send the close frame.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.write_handle.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, handle).await;
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in [
            self.read_handle.take(),
            self.write_handle.take(),
            self.ping_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}
