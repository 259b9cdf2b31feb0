pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;

use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite;

/// A frame queued for the write pump.
///
/// When `ack` is set the pump reports the outcome of the socket write
/// back to the caller.
pub(crate) struct Outbound {
    pub(crate) frame: tungstenite::Message,
    pub(crate) ack: Option<oneshot::Sender<Result<(), tungstenite::Error>>>,
}

impl Outbound {
    pub(crate) fn fire_and_forget(frame: tungstenite::Message) -> Self {
        Self { frame, ack: None }
    }
}
