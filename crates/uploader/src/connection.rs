//! Assembler connection trait.
//!
//! `AssemblerConnection` bridges the upload logic to a transport. The
//! WebSocket client implements it for remote assemblers and
//! [`LocalConnection`] for an in-process one; tests implement it with mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chunkferry_assembler::Assembler;
use chunkferry_protocol::FileDescriptor;
use chunkferry_protocol::messages::{
    CompleteUploadResponse, RegisterMetadataResponse, UploadChunkResponse, UploadStatusResponse,
};
use chunkferry_transfer::ChunkDescriptor;

use crate::error::UploadError;

/// A boxed future returned by connection methods.
pub type ConnFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract connection to an assembler.
///
/// Each method is one request/response exchange. Implementations report
/// assembler rejections as [`UploadError::Remote`] and link failures as
/// [`UploadError::Transport`] or [`UploadError::Timeout`], so the caller can
/// tell transient failures from fatal ones.
pub trait AssemblerConnection: Send + Sync {
    /// Registers file metadata ahead of any chunk.
    fn register<'a>(&'a self, file: &'a FileDescriptor) -> ConnFuture<'a, RegisterMetadataResponse>;

    /// Uploads one chunk.
    fn upload_chunk<'a>(
        &'a self,
        chunk: &'a ChunkDescriptor,
        total_chunks: u32,
    ) -> ConnFuture<'a, UploadChunkResponse>;

    /// Asks the assembler to reassemble the file.
    fn complete<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse>;

    /// Queries which chunks the assembler holds.
    fn status<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse>;
}

impl<C: AssemblerConnection + ?Sized> AssemblerConnection for Arc<C> {
    fn register<'a>(&'a self, file: &'a FileDescriptor) -> ConnFuture<'a, RegisterMetadataResponse> {
        (**self).register(file)
    }

    fn upload_chunk<'a>(
        &'a self,
        chunk: &'a ChunkDescriptor,
        total_chunks: u32,
    ) -> ConnFuture<'a, UploadChunkResponse> {
        (**self).upload_chunk(chunk, total_chunks)
    }

    fn complete<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse> {
        (**self).complete(file_id)
    }

    fn status<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse> {
        (**self).status(file_id)
    }
}

/// Connection to an assembler running in the same process.
#[derive(Clone)]
pub struct LocalConnection {
    assembler: Arc<Assembler>,
}

impl LocalConnection {
    pub fn new(assembler: Arc<Assembler>) -> Self {
        Self { assembler }
    }

    pub fn assembler(&self) -> &Arc<Assembler> {
        &self.assembler
    }
}

impl AssemblerConnection for LocalConnection {
    fn register<'a>(&'a self, file: &'a FileDescriptor) -> ConnFuture<'a, RegisterMetadataResponse> {
        Box::pin(async move { Ok(self.assembler.register_metadata(file.clone()).await?) })
    }

    fn upload_chunk<'a>(
        &'a self,
        chunk: &'a ChunkDescriptor,
        total_chunks: u32,
    ) -> ConnFuture<'a, UploadChunkResponse> {
        Box::pin(async move {
            Ok(self
                .assembler
                .store_chunk(
                    &chunk.file_id,
                    chunk.index,
                    total_chunks,
                    chunk.payload.clone(),
                    &chunk.checksum,
                )
                .await?)
        })
    }

    fn complete<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse> {
        Box::pin(async move { Ok(self.assembler.finalize(file_id).await?) })
    }

    fn status<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse> {
        Box::pin(async move { Ok(self.assembler.status(file_id).await?) })
    }
}
