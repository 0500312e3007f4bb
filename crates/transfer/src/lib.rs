//! Client-side building blocks of a resumable chunked upload.
//!
//! - [`ChunkSplitter`] partitions a file into fixed-size chunks.
//! - [`UploadSession`] tracks acknowledged chunks and the lifecycle phase.
//! - [`ProgressTracker`] derives a monotonic completion percentage.

mod chunked;
mod progress;
mod session;
mod types;
mod validation;

pub use chunked::{ChunkSource, ChunkSplitter, Chunks, calculate_file_checksum, checksum_bytes};
pub use progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
pub use session::{FailReason, UploadSession};
pub use types::{ChunkDescriptor, describe_file, new_file_id};
pub use validation::validate_file_name;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },

    #[error("cannot {action} while session is {status}")]
    InvalidTransition {
        status: chunkferry_protocol::SessionStatus,
        action: &'static str,
    },

    #[error("source changed: expected {expected} bytes, found {actual}")]
    SourceChanged { expected: u64, actual: u64 },
}
