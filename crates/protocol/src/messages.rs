use serde::{Deserialize, Serialize};

use crate::types::{AssembledFile, FileDescriptor};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Registers a file with the assembler before any chunk is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMetadataRequest {
    #[serde(flatten)]
    pub file: FileDescriptor,
}

/// Asks the assembler to verify coverage and reassemble the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub file_id: String,
}

/// Queries which chunk indexes the assembler holds for a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusRequest {
    pub file_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Registration accepted.
///
/// `received_indexes` is non-empty only when an existing registration with
/// identical metadata was resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMetadataResponse {
    pub file_id: String,
    #[serde(default)]
    pub resumed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub received_indexes: Vec<u32>,
    pub protocol_version: u32,
}

/// Chunk stored (or already held).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub file_id: String,
    pub chunk_index: u32,
    pub received_count: u32,
    /// `true` when the index was already stored; the resend was a no-op.
    #[serde(default)]
    pub duplicate: bool,
}

/// Outcome of a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompleteUploadResponse {
    Assembled {
        file: AssembledFile,
    },
    Missing {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "missingIndexes")]
        missing_indexes: Vec<u32>,
    },
}

/// Assembler-side view of one registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub file_id: String,
    pub total_chunks: u32,
    pub received_indexes: Vec<u32>,
    pub assembled: bool,
}
