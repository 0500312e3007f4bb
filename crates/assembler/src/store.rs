//! Chunk storage backends.
//!
//! Stores are synchronous; the [`Assembler`](crate::Assembler) drives them
//! from `spawn_blocking` so disk I/O stays off the async runtime.

use std::collections::HashMap;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Directory holding one persisted record per file inside the storage root.
pub const METADATA_DIR: &str = "meta";

/// Durable storage for chunk parts, assembled artifacts and file records.
pub trait ChunkStore: Send + Sync + 'static {
    /// Stores a chunk, replacing any previous part with the same key.
    /// Returns the storage location of the part.
    fn put_chunk(&self, file_id: &str, index: u32, data: &[u8]) -> io::Result<String>;

    /// Reads a previously stored chunk.
    fn get_chunk(&self, file_id: &str, index: u32) -> io::Result<Vec<u8>>;

    /// Deletes every stored part of `file_id`.
    fn remove_chunks(&self, file_id: &str) -> io::Result<()>;

    /// Opens a sink for the reassembled file.
    fn create_artifact(&self, file_id: &str, file_name: &str) -> io::Result<Box<dyn ArtifactSink>>;

    /// Loads every saved record, in no particular order.
    fn load_records(&self) -> io::Result<Vec<Vec<u8>>>;

    /// Replaces the saved record of `file_id`. Other files' records are
    /// untouched.
    fn save_record(&self, file_id: &str, data: &[u8]) -> io::Result<()>;
}

/// Destination of a reassembled file.
///
/// Nothing is visible at the final location until [`commit`](Self::commit).
pub trait ArtifactSink: Send {
    fn write_part(&mut self, data: &[u8]) -> io::Result<()>;

    /// Publishes the artifact and returns its location.
    fn commit(self: Box<Self>) -> io::Result<String>;
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Filesystem-backed store.
///
/// Layout under `root`:
/// - `meta/<fileId>.json`
/// - `chunks/<fileId>/chunk_<index>`
/// - `files/<fileId>/<fileName>`
///
/// Every file is written under a temporary name and renamed into place, so a
/// crash never leaves a truncated part at a final path.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(METADATA_DIR))?;
        std::fs::create_dir_all(root.join("chunks"))?;
        std::fs::create_dir_all(root.join("files"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_dir(&self, file_id: &str) -> PathBuf {
        self.root.join("chunks").join(file_id)
    }

    fn chunk_path(&self, file_id: &str, index: u32) -> PathBuf {
        self.chunk_dir(file_id).join(format!("chunk_{index}"))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

impl ChunkStore for FsChunkStore {
    fn put_chunk(&self, file_id: &str, index: u32, data: &[u8]) -> io::Result<String> {
        std::fs::create_dir_all(self.chunk_dir(file_id))?;
        let path = self.chunk_path(file_id, index);
        write_atomic(&path, data)?;
        Ok(path.display().to_string())
    }

    fn get_chunk(&self, file_id: &str, index: u32) -> io::Result<Vec<u8>> {
        std::fs::read(self.chunk_path(file_id, index))
    }

    fn remove_chunks(&self, file_id: &str) -> io::Result<()> {
        match std::fs::remove_dir_all(self.chunk_dir(file_id)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn create_artifact(&self, file_id: &str, file_name: &str) -> io::Result<Box<dyn ArtifactSink>> {
        let dir = self.root.join("files").join(file_id);
        std::fs::create_dir_all(&dir)?;
        let final_path = dir.join(file_name);
        let tmp_path = dir.join(format!(".{file_name}.partial"));
        let file = std::fs::File::create(&tmp_path)?;
        Ok(Box::new(FsArtifact {
            writer: BufWriter::new(file),
            tmp_path,
            final_path,
        }))
    }

    fn load_records(&self) -> io::Result<Vec<Vec<u8>>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(self.root.join(METADATA_DIR))? {
            let path = entry?.path();
            // Skips leftovers of interrupted writes.
            if path.extension().is_some_and(|ext| ext == "json") {
                records.push(std::fs::read(&path)?);
            }
        }
        Ok(records)
    }

    fn save_record(&self, file_id: &str, data: &[u8]) -> io::Result<()> {
        let path = self
            .root
            .join(METADATA_DIR)
            .join(format!("{file_id}.json"));
        write_atomic(&path, data)
    }
}

struct FsArtifact {
    writer: BufWriter<std::fs::File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl ArtifactSink for FsArtifact {
    fn write_part(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data)
    }

    fn commit(self: Box<Self>) -> io::Result<String> {
        let FsArtifact {
            writer,
            tmp_path,
            final_path,
        } = *self;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(final_path.display().to_string())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemInner {
    chunks: HashMap<(String, u32), Vec<u8>>,
    artifacts: HashMap<String, Vec<u8>>,
    records: HashMap<String, Vec<u8>>,
}

/// In-memory store for tests and embedded use.
///
/// Clones share the same storage, so a clone can be reopened by a second
/// [`Assembler`](crate::Assembler) to simulate a restart.
#[derive(Clone, Default)]
pub struct MemoryChunkStore {
    inner: Arc<Mutex<MemInner>>,
    failing_puts: Arc<AtomicU32>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `n` chunk writes fail with an I/O error.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Contents of the committed artifact for `file_id`.
    pub fn artifact(&self, file_id: &str) -> Option<Vec<u8>> {
        self.lock().artifacts.get(file_id).cloned()
    }

    /// Saved record of `file_id`, as last written.
    pub fn saved_record(&self, file_id: &str) -> Option<Vec<u8>> {
        self.lock().records.get(file_id).cloned()
    }

    /// Number of chunk parts currently stored for `file_id`.
    pub fn stored_chunks(&self, file_id: &str) -> usize {
        self.lock()
            .chunks
            .keys()
            .filter(|(id, _)| id == file_id)
            .count()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put_chunk(&self, file_id: &str, index: u32, data: &[u8]) -> io::Result<String> {
        let injected = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(io::Error::other("injected write failure"));
        }
        self.lock()
            .chunks
            .insert((file_id.to_string(), index), data.to_vec());
        Ok(format!("mem://{file_id}/chunk_{index}"))
    }

    fn get_chunk(&self, file_id: &str, index: u32) -> io::Result<Vec<u8>> {
        self.lock()
            .chunks
            .get(&(file_id.to_string(), index))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "chunk not stored"))
    }

    fn remove_chunks(&self, file_id: &str) -> io::Result<()> {
        self.lock().chunks.retain(|(id, _), _| id != file_id);
        Ok(())
    }

    fn create_artifact(&self, file_id: &str, file_name: &str) -> io::Result<Box<dyn ArtifactSink>> {
        Ok(Box::new(MemArtifact {
            inner: Arc::clone(&self.inner),
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            buf: Vec::new(),
        }))
    }

    fn load_records(&self) -> io::Result<Vec<Vec<u8>>> {
        Ok(self.lock().records.values().cloned().collect())
    }

    fn save_record(&self, file_id: &str, data: &[u8]) -> io::Result<()> {
        self.lock()
            .records
            .insert(file_id.to_string(), data.to_vec());
        Ok(())
    }
}

struct MemArtifact {
    inner: Arc<Mutex<MemInner>>,
    file_id: String,
    file_name: String,
    buf: Vec<u8>,
}

impl ArtifactSink for MemArtifact {
    fn write_part(&mut self, data: &[u8]) -> io::Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn commit(self: Box<Self>) -> io::Result<String> {
        let location = format!("mem://{}/{}", self.file_id, self.file_name);
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .artifacts
            .insert(self.file_id, self.buf);
        Ok(location)
    }
}
