//! One WebSocket subscriber: read pump, write pump, ping/pong.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::SUBSCRIBER_BUFFER;
use crate::hub::{BroadcastHub, Frame};

/// Keepalive timing for subscriber sockets.
#[derive(Debug, Clone, Copy)]
pub struct PingSettings {
    pub interval: Duration,
    /// How long a subscriber may take to answer a ping.
    pub timeout: Duration,
}

/// Serves one upgraded socket until the peer leaves, stops answering
/// pings, falls behind on broadcasts, or the server shuts down.
pub(crate) async fn serve_socket(
    socket: WebSocket,
    hub: Arc<BroadcastHub>,
    ping: PingSettings,
    shutdown: CancellationToken,
) {
    let id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel::<Frame>(SUBSCRIBER_BUFFER);
    hub.on_connect(id.clone(), tx);

    let cancel = shutdown.child_token();
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_pump(sink, rx, ping.interval, cancel.clone()));
    read_pump(stream, &hub, &id, ping.interval + ping.timeout, cancel.clone()).await;

    cancel.cancel();
    hub.on_disconnect(&id);
    let _ = writer.await;
    info!(subscriber = %id, "connection closed");
}

/// Forwards broadcast frames and sends pings. Exits when the hub drops
/// this subscriber or a write fails.
async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Frame>,
    ping_interval: Duration,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = rx.recv() => {
                let Some(frame) = frame else {
                    debug!("removed from hub, closing");
                    break;
                };
                if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
                    debug!("write failed: {e}");
                    break;
                }
            }

            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    debug!("ping failed: {e}");
                    break;
                }
            }
        }
    }

    cancel.cancel();
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// Hands text frames to the hub. Any frame counts as a sign of life.
async fn read_pump<S, E>(
    mut stream: S,
    hub: &BroadcastHub,
    id: &str,
    deadline: Duration,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let silence = tokio::time::sleep(deadline);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut silence => {
                warn!(subscriber = %id, "pong timeout, closing");
                break;
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        silence.as_mut().reset(tokio::time::Instant::now() + deadline);
                        match msg {
                            Message::Text(text) => {
                                let outcome = hub.on_message(id, text.as_str());
                                trace!(subscriber = %id, ?outcome, "inbound frame");
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        debug!(subscriber = %id, "read failed: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
