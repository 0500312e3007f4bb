//! Upload error types.

use chunkferry_protocol::constants::is_retryable_code;
use chunkferry_transfer::TransferError;

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("registration rejected: {0}")]
    Registration(String),

    #[error("chunk {index} failed: {last_error}")]
    ChunkTransmission { index: u32, last_error: String },

    #[error("assembler is still missing chunks {missing:?}")]
    PartialUpload { missing: Vec<u32> },

    #[error("assembled digest {actual} does not match local digest {expected}")]
    DigestMismatch { expected: String, actual: String },

    #[error("cancelled by user")]
    UserCancelled,

    #[error("assembler error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl UploadError {
    /// Returns `true` if a resend of the same request may succeed.
    ///
    /// Transport failures, timeouts and retryable assembler codes (storage
    /// failures, checksum mismatches) are transient; everything else is
    /// fatal for the session.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Remote { code, .. } => is_retryable_code(*code),
            _ => false,
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::InvalidConfiguration(msg) => Self::InvalidConfiguration(msg),
            TransferError::Io(io) => Self::Io(io),
            other => Self::Transfer(other),
        }
    }
}

impl From<chunkferry_assembler::AssemblerError> for UploadError {
    fn from(e: chunkferry_assembler::AssemblerError) -> Self {
        Self::Remote {
            code: e.code(),
            message: e.to_string(),
        }
    }
}
