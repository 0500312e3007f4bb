//! WebSocket read pump: routes responses to waiting requests.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chunkferry_protocol::Message;
use chunkferry_protocol::constants::WS_PONG_WAIT;

use super::PendingRequests;

/// Reads frames from the WebSocket and completes pending requests.
///
/// Any inbound frame resets the liveness deadline; after [`WS_PONG_WAIT`]
/// of silence the connection is considered dead. On exit every pending
/// request is dropped, so its caller sees a closed connection instead of
/// waiting for its timeout.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingRequests,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("no traffic from assembler, closing connection");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(&text, &pending);
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => trace!("received pong"),
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
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
    pending.clear();
}

/// Hands a text response to the request waiting for its id.
fn handle_text_message(text: &str, pending: &PendingRequests) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    if let Err(msg) = pending.complete(msg) {
        match &msg.error {
            Some(err) => {
                warn!(id = %msg.id, code = err.code, "unsolicited error: {}", err.message)
            }
            None => debug!(id = %msg.id, msg_type = ?msg.msg_type, "response without waiter dropped"),
        }
    }
}
