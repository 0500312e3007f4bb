//! WebSocket server for the ChunkFerry assembler.
//!
//! Accepts any number of uploader connections, dispatches JSON and binary
//! messages to a [`Handler`], and manages each connection's lifecycle
//! (ping/pong, graceful shutdown). [`AssemblerService`] is the handler that
//! maps the wire protocol onto an [`Assembler`](chunkferry_assembler::Assembler).

mod connection;
mod handler;
mod server;
mod service;

pub use connection::{ClientConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{AssemblerServer, ServerConfig};
pub use service::AssemblerService;

/// Send buffer capacity per connection.
///
/// Each chunk frame produces exactly one reply, so the buffer only needs to
/// hold the replies of one uploader's in-flight window plus keepalives.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the assembler server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server already running")]
    AlreadyRunning,
}
