//! Uploader side of the ChunkFerry protocol.
//!
//! - [`AssemblerConnection`] abstracts the transport; [`WsClient`] speaks the
//!   WebSocket protocol and [`LocalConnection`] calls an in-process assembler.
//! - [`ChunkTransmitter`] sends chunks with per-chunk retry and bounded
//!   concurrency.
//! - [`FileUpload`] drives one file from registration to assembly.
//! - [`UploadOrchestrator`] uploads many files at once, one task each.

mod connection;
mod error;
mod orchestrator;
mod pumps;
mod retry;
mod transmitter;
mod types;
mod upload;
mod ws_client;

pub use connection::{AssemblerConnection, ConnFuture, LocalConnection};
pub use error::UploadError;
pub use orchestrator::UploadOrchestrator;
pub use retry::RetryConfig;
pub use transmitter::ChunkTransmitter;
pub use types::{EventSink, UploadConfig, UploadEvent, UploadOutcome, UploadResult, UploadSource};
pub use upload::FileUpload;
pub use ws_client::{WsClient, WsClientError};
