//! WebSocket ping pump — periodic keepalive pings.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use super::Outbound;

/// Sends a ping every `period` until cancelled or the writer goes away.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<Outbound>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let ping = Outbound::fire_and_forget(tungstenite::Message::Ping(vec![].into()));
                if write_tx.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }

    // The pong deadline itself is enforced by the read pump.
}
