use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Protocol version advertised in registration responses.
pub const PROTOCOL_VERSION: u32 = 1;

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window the
/// connection is considered dead. Set high enough to tolerate slow disk
/// writes on the assembler during large chunk uploads.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Timeout for request/response operations (text messages).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for binary request/response operations (chunk uploads).
///
/// Chunk uploads may take significantly longer than text requests due to
/// disk I/O and network conditions.
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from uploader to assembler
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "register_metadata")]
    RegisterMetadata,
    #[serde(rename = "complete_upload")]
    CompleteUpload,
    #[serde(rename = "upload_status")]
    UploadStatus,

    // Responses from assembler to uploader
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "register_metadata_response")]
    RegisterMetadataResponse,
    #[serde(rename = "upload_chunk_response")]
    UploadChunkResponse,
    #[serde(rename = "complete_upload_response")]
    CompleteUploadResponse,
    #[serde(rename = "upload_status_response")]
    UploadStatusResponse,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common WebSocket error codes.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_NOT_FOUND: i32 = 404;
pub const WS_ERR_CODE_CONFLICT: i32 = 409;
/// Chunk payload did not match its checksum. Retryable.
pub const WS_ERR_CODE_CHECKSUM: i32 = 422;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;

/// Returns `true` if an assembler error code describes a condition that a
/// resend may clear (storage hiccups, corrupted payloads).
pub fn is_retryable_code(code: i32) -> bool {
    code == WS_ERR_CODE_CHECKSUM || (code >= WS_ERR_CODE_INTERNAL && code != WS_ERR_CODE_NOT_IMPLEMENTED)
}
