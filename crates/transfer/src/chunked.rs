use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunkferry_protocol::FileDescriptor;
use sha2::{Digest, Sha256};

use crate::types::{ChunkDescriptor, describe_file};
use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkSplitter
// ---------------------------------------------------------------------------

/// Where chunk bytes come from.
#[derive(Debug, Clone)]
pub enum ChunkSource {
    /// A file on disk, reopened for every read.
    File(PathBuf),
    /// An in-memory buffer.
    Memory(Arc<[u8]>),
}

/// Partitions a file into fixed-size, independently addressable chunks.
///
/// Chunks are read on demand, so at most one chunk payload is resident per
/// call to [`read_chunk`](Self::read_chunk). The last chunk may be shorter
/// than `chunk_size`; a zero-byte file has no chunks.
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    source: ChunkSource,
    descriptor: FileDescriptor,
}

impl ChunkSplitter {
    /// Opens `path` for chunked reading under a fresh file id.
    ///
    /// The file name recorded in the descriptor is the final component of
    /// `path`.
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file_size = std::fs::metadata(path)?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::InvalidFileName(format!("no file name in {}", path.display()))
            })?;
        let descriptor = describe_file(&file_name, file_size, chunk_size)?;
        tracing::debug!(
            path = %path.display(),
            file_id = %descriptor.file_id,
            file_size,
            total_chunks = descriptor.total_chunks,
            "file split into chunks"
        );
        Ok(Self {
            source: ChunkSource::File(path.to_path_buf()),
            descriptor,
        })
    }

    /// Splits an in-memory buffer.
    pub fn from_bytes(
        file_name: &str,
        data: impl Into<Arc<[u8]>>,
        chunk_size: u64,
    ) -> Result<Self, TransferError> {
        let data = data.into();
        let descriptor = describe_file(file_name, data.len() as u64, chunk_size)?;
        Ok(Self {
            source: ChunkSource::Memory(data),
            descriptor,
        })
    }

    /// Replaces the generated file id.
    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.descriptor.file_id = file_id.into();
        self
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    pub fn source(&self) -> &ChunkSource {
        &self.source
    }

    pub fn total_chunks(&self) -> u32 {
        self.descriptor.total_chunks
    }

    /// Reads chunk `index`, computing its checksum.
    ///
    /// Fails with [`TransferError::SourceChanged`] if the file on disk no
    /// longer has the size recorded when the splitter was opened.
    pub fn read_chunk(&self, index: u32) -> Result<ChunkDescriptor, TransferError> {
        let (start, end) =
            self.descriptor
                .chunk_range(index)
                .ok_or(TransferError::ChunkOutOfRange {
                    index,
                    total: self.descriptor.total_chunks,
                })?;
        let len = (end - start) as usize;

        let payload = match &self.source {
            ChunkSource::Memory(data) => data[start as usize..end as usize].to_vec(),
            ChunkSource::File(path) => {
                let mut file = std::fs::File::open(path)?;
                let actual = file.metadata()?.len();
                if actual != self.descriptor.file_size {
                    return Err(TransferError::SourceChanged {
                        expected: self.descriptor.file_size,
                        actual,
                    });
                }
                file.seek(SeekFrom::Start(start))?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                buf
            }
        };

        let checksum = checksum_bytes(&payload);
        Ok(ChunkDescriptor {
            file_id: self.descriptor.file_id.clone(),
            index,
            byte_start: start,
            byte_end: end,
            payload,
            checksum,
        })
    }

    /// Returns a lazy iterator over all chunks in index order.
    ///
    /// Each call starts over from chunk 0.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            splitter: self,
            next: 0,
        }
    }

    /// SHA-256 hex digest of the whole source.
    pub fn digest(&self) -> Result<String, TransferError> {
        match &self.source {
            ChunkSource::File(path) => calculate_file_checksum(path),
            ChunkSource::Memory(data) => Ok(checksum_bytes(data)),
        }
    }
}

/// Iterator returned by [`ChunkSplitter::chunks`].
pub struct Chunks<'a> {
    splitter: &'a ChunkSplitter,
    next: u32,
}

impl Iterator for Chunks<'_> {
    type Item = Result<ChunkDescriptor, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.splitter.total_chunks() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.splitter.read_chunk(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.splitter.total_chunks().saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}
