//! Server-side half of the chunked upload protocol.
//!
//! The [`Assembler`] accepts metadata registrations, stores chunks keyed by
//! `(fileId, chunkIndex)` through a [`ChunkStore`], and reassembles the
//! original file once every index has arrived.

mod assembler;
mod record;
mod store;

pub use assembler::Assembler;
pub use record::AssemblyRecord;
pub use store::{ArtifactSink, ChunkStore, FsChunkStore, METADATA_DIR, MemoryChunkStore};

use chunkferry_protocol::constants::{
    WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_CHECKSUM, WS_ERR_CODE_CONFLICT, WS_ERR_CODE_INTERNAL,
    WS_ERR_CODE_NOT_FOUND,
};

/// Errors produced by the assembler.
#[derive(Debug, thiserror::Error)]
pub enum AssemblerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown file id: {0}")]
    UnknownFile(String),

    #[error("conflicting registration for {0}")]
    Conflict(String),

    #[error("checksum mismatch for chunk {index}")]
    ChecksumMismatch { index: u32 },

    #[error("assembled file is corrupt: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AssemblerError {
    /// Wire error code reported to the uploader.
    pub fn code(&self) -> i32 {
        match self {
            Self::Validation(_) => WS_ERR_CODE_BAD_REQUEST,
            Self::UnknownFile(_) => WS_ERR_CODE_NOT_FOUND,
            Self::Conflict(_) => WS_ERR_CODE_CONFLICT,
            Self::ChecksumMismatch { .. } => WS_ERR_CODE_CHECKSUM,
            Self::Io(_) | Self::Json(_) | Self::Corrupt(_) | Self::Task(_) => WS_ERR_CODE_INTERNAL,
        }
    }
}

impl From<chunkferry_transfer::TransferError> for AssemblerError {
    fn from(e: chunkferry_transfer::TransferError) -> Self {
        match e {
            chunkferry_transfer::TransferError::Io(io) => Self::Io(io),
            other => Self::Validation(other.to_string()),
        }
    }
}
