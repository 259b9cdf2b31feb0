//! WebSocket read pump — liveness tracking.
//!
//! The server never sends application data back to the collector, so this
//! pump exists to answer pings, notice pongs and detect a dead peer.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Outbound;

/// Reads frames until the peer goes away or stays silent for `deadline`.
///
/// Any incoming frame resets the deadline. On exit the session is
/// cancelled, which stops the write and ping pumps as well.
pub(crate) async fn read_pump<S>(
    mut read: S,
    write_tx: mpsc::Sender<Outbound>,
    deadline: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let silence = tokio::time::sleep(deadline);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut silence => {
                warn!("no pong within {deadline:?}, connection dead");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        silence.as_mut().reset(tokio::time::Instant::now() + deadline);

                        match msg {
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let pong = Outbound::fire_and_forget(tungstenite::Message::Pong(data));
                                let _ = write_tx.send(pong).await;
                            }
                            tungstenite::Message::Pong(_) => trace!("received pong"),
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            tungstenite::Message::Text(text) => {
                                trace!(len = text.len(), "ignoring text frame from server");
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
}
