use chunkferry_protocol::FileDescriptor;
use chunkferry_protocol::types::total_chunks;

use crate::TransferError;

/// One chunk of file data ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub file_id: String,
    /// Zero-based chunk index; identifies the chunk regardless of send order.
    pub index: u32,
    /// First byte covered (inclusive).
    pub byte_start: u64,
    /// Last byte covered (exclusive).
    pub byte_end: u64,
    /// Raw chunk data.
    pub payload: Vec<u8>,
    /// SHA-256 hex checksum of `payload`.
    pub checksum: String,
}

impl ChunkDescriptor {
    /// Payload length in bytes.
    pub fn len(&self) -> u64 {
        self.byte_end - self.byte_start
    }

    pub fn is_empty(&self) -> bool {
        self.byte_end == self.byte_start
    }
}

/// Generates a fresh upload identifier.
///
/// Every upload attempt gets its own id, so a retried upload of the same
/// logical file never collides with an earlier attempt.
pub fn new_file_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Builds a [`FileDescriptor`] with a fresh id.
///
/// Fails with [`TransferError::InvalidConfiguration`] when `chunk_size` is
/// zero or the file would need more than `u32::MAX` chunks.
pub fn describe_file(
    file_name: &str,
    file_size: u64,
    chunk_size: u64,
) -> Result<FileDescriptor, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidConfiguration(
            "chunk size must be greater than zero".into(),
        ));
    }
    let total = total_chunks(file_size, chunk_size).ok_or_else(|| {
        TransferError::InvalidConfiguration(format!(
            "{file_size} bytes at chunk size {chunk_size} exceeds the chunk index range"
        ))
    })?;

    Ok(FileDescriptor {
        file_id: new_file_id(),
        file_name: file_name.to_string(),
        file_size,
        chunk_size,
        total_chunks: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_file_computes_total_chunks() {
        let d = describe_file("big.iso", 2_500_000, 1_048_576).unwrap();
        assert_eq!(d.total_chunks, 3);
        assert_eq!(d.file_name, "big.iso");
        assert!(d.is_consistent());
    }

    #[test]
    fn describe_file_rejects_zero_chunk_size() {
        let err = describe_file("a", 10, 0).unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfiguration(_)));
    }

    #[test]
    fn describe_file_rejects_index_overflow() {
        let err = describe_file("a", u64::MAX, 1).unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfiguration(_)));
    }

    #[test]
    fn file_ids_are_unique_per_attempt() {
        let a = describe_file("same.txt", 10, 4).unwrap();
        let b = describe_file("same.txt", 10, 4).unwrap();
        assert_ne!(a.file_id, b.file_id);
    }
}
