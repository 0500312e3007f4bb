use serde::{Deserialize, Serialize};

/// Returns the number of chunks needed to cover `file_size` bytes.
///
/// Returns `None` when `chunk_size` is zero or the count does not fit in
/// a `u32`. A zero-byte file needs zero chunks.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Option<u32> {
    if chunk_size == 0 {
        return None;
    }
    u32::try_from(file_size.div_ceil(chunk_size)).ok()
}

/// Immutable description of one file upload attempt.
///
/// This is also the registration payload sent to the assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

impl FileDescriptor {
    /// Returns `true` if `total_chunks` agrees with `file_size / chunk_size`.
    pub fn is_consistent(&self) -> bool {
        total_chunks(self.file_size, self.chunk_size) == Some(self.total_chunks)
    }

    /// Byte range `[start, end)` covered by chunk `index`.
    ///
    /// `None` for an index past `total_chunks` or one that starts beyond
    /// the end of the file, which only an inconsistent descriptor allows.
    pub fn chunk_range(&self, index: u32) -> Option<(u64, u64)> {
        if index >= self.total_chunks {
            return None;
        }
        let start = u64::from(index).checked_mul(self.chunk_size)?;
        if start >= self.file_size {
            return None;
        }
        let end = start.saturating_add(self.chunk_size).min(self.file_size);
        Some((start, end))
    }

    /// Expected payload length of chunk `index`.
    pub fn chunk_len(&self, index: u32) -> Option<u64> {
        self.chunk_range(index).map(|(start, end)| end - start)
    }
}

/// Description of a fully reassembled file, returned by `complete_upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledFile {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    /// SHA-256 hex digest of the assembled bytes.
    pub sha256: String,
    /// Location of the artifact on the assembler host.
    pub path: String,
}

/// Lifecycle phase of a client-side upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Registered,
    Uploading,
    Completing,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initiated => "initiated",
            Self::Registered => "registered",
            Self::Uploading => "uploading",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
