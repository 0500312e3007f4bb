use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use chunkferry_protocol::constants::PROTOCOL_VERSION;
use chunkferry_protocol::messages::{
    CompleteUploadResponse, RegisterMetadataResponse, UploadChunkResponse, UploadStatusResponse,
};
use chunkferry_protocol::{AssembledFile, FileDescriptor};
use chunkferry_transfer::{checksum_bytes, validate_file_name};

use crate::AssemblerError;
use crate::record::AssemblyRecord;
use crate::store::{ChunkStore, FsChunkStore};

/// Stores chunks for registered files and reassembles them on request.
///
/// Safe to share behind an `Arc`: operations on different files run in
/// parallel, while operations on the same file are serialized by a per-file
/// gate so that finalization happens exactly once. Each file's record is
/// persisted on its own, under that file's gate.
pub struct Assembler {
    store: Arc<dyn ChunkStore>,
    records: Mutex<HashMap<String, AssemblyRecord>>,
    gates: Gates,
}

type Gates = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Exclusive access to one file. The gate entry is dropped from the map
/// when its last holder or waiter lets go.
struct FileGate<'a> {
    gates: &'a Gates,
    file_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FileGate<'_> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if gates
            .get(&self.file_id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&self.file_id);
        }
    }
}

impl Assembler {
    /// Opens an assembler over `store`, reloading any persisted records.
    pub async fn open(store: Arc<dyn ChunkStore>) -> Result<Self, AssemblerError> {
        let loader = Arc::clone(&store);
        let saved = tokio::task::spawn_blocking(move || loader.load_records()).await??;
        let mut records = HashMap::with_capacity(saved.len());
        for data in saved {
            let record = AssemblyRecord::from_json(&data)?;
            records.insert(record.file_id.clone(), record);
        }
        tracing::info!(records = records.len(), "assembler opened");

        Ok(Self {
            store,
            records: Mutex::new(records),
            gates: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Opens an assembler backed by a [`FsChunkStore`] rooted at `root`.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Self, AssemblerError> {
        let root = root.into();
        let store = tokio::task::spawn_blocking(move || FsChunkStore::new(root)).await??;
        Self::open(Arc::new(store)).await
    }

    async fn lock_file(&self, file_id: &str) -> FileGate<'_> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(gates.entry(file_id.to_string()).or_default())
        };
        let guard = gate.lock_owned().await;
        FileGate {
            gates: &self.gates,
            file_id: file_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Writes the current record of `file_id`. Callers hold its gate, so
    /// writes for one file land in order.
    async fn persist(&self, file_id: &str) -> Result<(), AssemblerError> {
        let json = {
            let records = self.records.lock().await;
            match records.get(file_id) {
                Some(record) => record.to_json()?,
                None => return Ok(()),
            }
        };
        let store = Arc::clone(&self.store);
        let id = file_id.to_string();
        tokio::task::spawn_blocking(move || store.save_record(&id, &json)).await??;
        Ok(())
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Accepts a file registration.
    ///
    /// Re-registering an existing id with identical metadata resumes it and
    /// reports the indexes already stored; different metadata is a conflict.
    pub async fn register_metadata(
        &self,
        descriptor: FileDescriptor,
    ) -> Result<RegisterMetadataResponse, AssemblerError> {
        validate_file_name(&descriptor.file_id)
            .map_err(|e| AssemblerError::Validation(format!("invalid file id: {e}")))?;
        validate_file_name(&descriptor.file_name)?;
        if descriptor.chunk_size == 0 {
            return Err(AssemblerError::Validation(
                "chunkSize must be greater than zero".into(),
            ));
        }
        if !descriptor.is_consistent() {
            return Err(AssemblerError::Validation(format!(
                "totalChunks {} does not cover {} bytes at chunk size {}",
                descriptor.total_chunks, descriptor.file_size, descriptor.chunk_size
            )));
        }

        let file_id = descriptor.file_id.clone();
        let _gate = self.lock_file(&file_id).await;
        {
            let mut records = self.records.lock().await;
            if let Some(existing) = records.get(&file_id) {
                if !existing.matches(&descriptor) {
                    tracing::warn!(file_id = %file_id, "registration conflicts with existing record");
                    return Err(AssemblerError::Conflict(file_id));
                }
                let received_indexes = existing.received_indexes();
                tracing::info!(
                    file_id = %file_id,
                    received = received_indexes.len(),
                    "registration resumed"
                );
                return Ok(RegisterMetadataResponse {
                    file_id,
                    resumed: true,
                    received_indexes,
                    protocol_version: PROTOCOL_VERSION,
                });
            }
            records.insert(file_id.clone(), AssemblyRecord::new(&descriptor));
        }
        self.persist(&file_id).await?;

        tracing::info!(
            file_id = %file_id,
            file_name = %descriptor.file_name,
            file_size = descriptor.file_size,
            total_chunks = descriptor.total_chunks,
            "file registered"
        );
        Ok(RegisterMetadataResponse {
            file_id,
            resumed: false,
            received_indexes: Vec::new(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    /// Stores one chunk. Idempotent per index: a resend of a stored index is
    /// acknowledged as a duplicate without touching storage.
    ///
    /// An empty `checksum` skips payload verification.
    pub async fn store_chunk(
        &self,
        file_id: &str,
        index: u32,
        total_chunks: u32,
        payload: Vec<u8>,
        checksum: &str,
    ) -> Result<UploadChunkResponse, AssemblerError> {
        let _gate = self.lock_file(file_id).await;

        let expected_len = {
            let records = self.records.lock().await;
            let record = records
                .get(file_id)
                .ok_or_else(|| AssemblerError::UnknownFile(file_id.to_string()))?;
            if total_chunks != record.total_chunks {
                return Err(AssemblerError::Validation(format!(
                    "totalChunks {total_chunks} does not match registered {}",
                    record.total_chunks
                )));
            }
            let expected = record.descriptor().chunk_len(index).ok_or_else(|| {
                AssemblerError::Validation(format!(
                    "chunk index {index} out of range (total {})",
                    record.total_chunks
                ))
            })?;
            if record.assembled.is_some() || record.is_received(index) {
                tracing::debug!(file_id, index, "duplicate chunk ignored");
                return Ok(UploadChunkResponse {
                    file_id: file_id.to_string(),
                    chunk_index: index,
                    received_count: record.received_indexes().len() as u32,
                    duplicate: true,
                });
            }
            expected
        };

        if payload.len() as u64 != expected_len {
            return Err(AssemblerError::Validation(format!(
                "chunk {index} is {} bytes, expected {expected_len}",
                payload.len()
            )));
        }
        if !checksum.is_empty() && !checksum_bytes(&payload).eq_ignore_ascii_case(checksum) {
            tracing::warn!(file_id, index, "chunk checksum mismatch");
            return Err(AssemblerError::ChecksumMismatch { index });
        }

        let store = Arc::clone(&self.store);
        let id = file_id.to_string();
        let location =
            tokio::task::spawn_blocking(move || store.put_chunk(&id, index, &payload)).await??;

        let received_count = {
            let mut records = self.records.lock().await;
            let record = records
                .get_mut(file_id)
                .ok_or_else(|| AssemblerError::UnknownFile(file_id.to_string()))?;
            record.received.insert(index, location);
            record.received_count()
        };
        self.persist(file_id).await?;

        tracing::debug!(file_id, index, received_count, "chunk stored");
        Ok(UploadChunkResponse {
            file_id: file_id.to_string(),
            chunk_index: index,
            received_count,
            duplicate: false,
        })
    }

    /// Reassembles the file if every index is stored, otherwise reports the
    /// missing indexes. Repeated calls after success return the same
    /// descriptor.
    pub async fn finalize(&self, file_id: &str) -> Result<CompleteUploadResponse, AssemblerError> {
        let _gate = self.lock_file(file_id).await;

        let record = self
            .records
            .lock()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| AssemblerError::UnknownFile(file_id.to_string()))?;

        if let Some(file) = &record.assembled {
            return Ok(CompleteUploadResponse::Assembled { file: file.clone() });
        }

        let missing = record.missing();
        if !missing.is_empty() {
            tracing::info!(file_id, missing = missing.len(), "completion requested with gaps");
            return Ok(CompleteUploadResponse::Missing {
                file_id: file_id.to_string(),
                missing_indexes: missing,
            });
        }

        let store = Arc::clone(&self.store);
        let rec = record.clone();
        let (path, sha256) =
            tokio::task::spawn_blocking(move || concatenate(store.as_ref(), &rec)).await??;

        let file = AssembledFile {
            file_id: record.file_id.clone(),
            file_name: record.file_name.clone(),
            file_size: record.file_size,
            total_chunks: record.total_chunks,
            sha256,
            path,
        };
        {
            let mut records = self.records.lock().await;
            if let Some(r) = records.get_mut(file_id) {
                r.assembled = Some(file.clone());
                r.received.clear();
            }
        }
        self.persist(file_id).await?;

        let store = Arc::clone(&self.store);
        let id = file_id.to_string();
        match tokio::task::spawn_blocking(move || store.remove_chunks(&id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(file_id, "failed to remove chunk parts: {e}"),
            Err(e) => tracing::warn!(file_id, "chunk cleanup task failed: {e}"),
        }

        tracing::info!(
            file_id,
            path = %file.path,
            sha256 = %file.sha256,
            "file assembled"
        );
        Ok(CompleteUploadResponse::Assembled { file })
    }

    /// Reports which indexes are stored for `file_id`.
    pub async fn status(&self, file_id: &str) -> Result<UploadStatusResponse, AssemblerError> {
        let records = self.records.lock().await;
        let record = records
            .get(file_id)
            .ok_or_else(|| AssemblerError::UnknownFile(file_id.to_string()))?;
        Ok(UploadStatusResponse {
            file_id: file_id.to_string(),
            total_chunks: record.total_chunks,
            received_indexes: record.received_indexes(),
            assembled: record.assembled.is_some(),
        })
    }
}

/// Streams every chunk into a new artifact in index order.
/// Returns the artifact location and its SHA-256 hex digest.
fn concatenate(
    store: &dyn ChunkStore,
    record: &AssemblyRecord,
) -> Result<(String, String), AssemblerError> {
    let mut sink = store.create_artifact(&record.file_id, &record.file_name)?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;

    for index in 0..record.total_chunks {
        let data = store.get_chunk(&record.file_id, index)?;
        hasher.update(&data);
        size += data.len() as u64;
        sink.write_part(&data)?;
    }

    if size != record.file_size {
        return Err(AssemblerError::Corrupt(format!(
            "assembled {size} bytes, expected {}",
            record.file_size
        )));
    }

    let location = sink.commit()?;
    Ok((location, hex::encode(hasher.finalize())))
}
