//! WebSocket write pump — serialises outbound frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::Outbound;

/// Writes frames to the WebSocket and reports each result to its sender.
///
/// A failed write cancels the session so the other pumps stop too.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(Outbound { frame, ack }) = msg else { break };
                let result = write.send(frame).await;
                let failed = result.is_err();
                if let Err(e) = &result {
                    error!("WebSocket write error: {e}");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
                if failed {
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
