//! Handler trait for processing uploader messages.
//!
//! Implementors provide the storage logic while the server framework
//! handles connection management, routing, and the binary chunk protocol.

use std::future::Future;
use std::pin::Pin;

use chunkferry_protocol::constants::{MessageType, WS_ERR_CODE_NOT_IMPLEMENTED};
use chunkferry_protocol::{ChunkHeader, Message};

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from an uploader.
///
/// Every request method receives the connection's [`Sender`] and must answer
/// through it with a reply carrying the request id. Default implementations
/// reply with "not implemented" so handlers only override what they serve.
pub trait Handler: Send + Sync + 'static {
    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_msg(Message::bare(msg.id, MessageType::Pong));
        })
    }

    /// Called for `register_metadata`.
    fn on_register_metadata(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `complete_upload`.
    fn on_complete_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `upload_status`.
    fn on_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg.id, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for a binary chunk frame.
    fn on_chunk(&self, sender: Sender, header: ChunkHeader, data: Vec<u8>) -> HandlerFuture<'_> {
        let _ = data;
        Box::pin(async move {
            let _ = sender.send_error(&header.id, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called when the uploader disconnects (cleanup hook).
    fn on_disconnected(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}
