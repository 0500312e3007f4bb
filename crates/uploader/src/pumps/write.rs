//! WebSocket write pump: the only task that touches the sink.
//!
//! Queued frames and keepalive pings share one loop, so a ping can never
//! interleave with a half-written chunk frame.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chunkferry_protocol::constants::WS_PING_PERIOD;

/// Drains `write_rx` into `sink` and pings every [`WS_PING_PERIOD`].
///
/// Stops on cancellation, on a closed queue or on the first write error.
/// Cancels `cancel` on exit so requests issued afterwards fail fast.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + WS_PING_PERIOD,
        WS_PING_PERIOD,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break "cancelled",
            _ = keepalive.tick() => {
                trace!("sending keepalive ping");
                tungstenite::Message::Ping(Vec::new().into())
            }
            queued = write_rx.recv() => match queued {
                Some(frame) => frame,
                None => break "queue closed",
            },
        };

        let closing = matches!(frame, tungstenite::Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            warn!("WebSocket write error: {e}");
            break "write error";
        }
        if closing {
            break "close sent";
        }
    };

    debug!(reason, "write pump stopped");
    if reason != "close sent" && reason != "write error" {
        let _ = sink.send(tungstenite::Message::Close(None)).await;
    }
    cancel.cancel();
}
