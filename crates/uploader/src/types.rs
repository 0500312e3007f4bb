use std::path::PathBuf;
use std::sync::Arc;

use chunkferry_protocol::AssembledFile;
use chunkferry_transfer::{ChunkSplitter, DEFAULT_CHUNK_SIZE, TransferError};
use tokio::sync::mpsc;

use crate::error::UploadError;
use crate::retry::RetryConfig;

/// Uploader settings shared by every file of an orchestrated upload.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Bytes per chunk.
    pub chunk_size: u64,
    /// Chunks in flight per file; 1 sends in index order.
    pub concurrency: usize,
    pub retry: RetryConfig,
    /// Resend rounds after the assembler reports missing chunks.
    pub max_completion_rounds: u32,
    /// Compare the assembled SHA-256 against the local file.
    pub verify_digest: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 1,
            retry: RetryConfig::default(),
            max_completion_rounds: 3,
            verify_digest: true,
        }
    }
}

impl UploadConfig {
    /// Rejects settings no upload can run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfiguration(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConfiguration(
                "concurrency must be at least 1".into(),
            ));
        }
        self.retry.validate()
    }
}

/// A file handed to the orchestrator.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A file on disk.
    Path(PathBuf),
    /// An in-memory buffer uploaded under `name`.
    Bytes { name: String, data: Arc<[u8]> },
}

impl UploadSource {
    /// Label identifying this source in events and results.
    pub fn label(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { name, .. } => name.clone(),
        }
    }

    /// Opens a splitter over the source under a fresh file id.
    pub fn open(&self, chunk_size: u64) -> Result<ChunkSplitter, TransferError> {
        match self {
            Self::Path(path) => ChunkSplitter::open(path, chunk_size),
            Self::Bytes { name, data } => ChunkSplitter::from_bytes(name, data.clone(), chunk_size),
        }
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// Events emitted during an orchestrated upload.
///
/// `source` is the [`UploadSource::label`] of the file. Every file ends with
/// exactly one of `Completed`, `Failed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The assembler accepted the registration.
    Registered {
        source: String,
        file_id: String,
        total_chunks: u32,
        /// Chunks the assembler already held.
        already_received: u32,
    },
    /// Completion percentage advanced.
    Progress {
        source: String,
        file_id: String,
        percent: u8,
    },
    /// A chunk attempt failed transiently and will be retried.
    ChunkRetry {
        source: String,
        file_id: String,
        index: u32,
        attempt: u32,
        error: String,
    },
    Completed { source: String, file: AssembledFile },
    Failed { source: String, error: String },
    Cancelled { source: String },
}

impl UploadEvent {
    pub fn source(&self) -> &str {
        match self {
            Self::Registered { source, .. }
            | Self::Progress { source, .. }
            | Self::ChunkRetry { source, .. }
            | Self::Completed { source, .. }
            | Self::Failed { source, .. }
            | Self::Cancelled { source } => source,
        }
    }

    /// `true` for the single outcome event each file reports.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Event channel handle bound to one source.
#[derive(Debug, Clone)]
pub struct EventSink {
    source: String,
    tx: mpsc::Sender<UploadEvent>,
}

impl EventSink {
    pub fn new(source: impl Into<String>, tx: mpsc::Sender<UploadEvent>) -> Self {
        Self {
            source: source.into(),
            tx,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Sends an event, waiting for channel capacity. A dropped receiver is
    /// ignored.
    pub async fn emit(&self, event: UploadEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Sends an event without waiting; dropped if the channel is full.
    pub fn try_emit(&self, event: UploadEvent) {
        let _ = self.tx.try_send(event);
    }
}

/// Final state of one orchestrated file.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Completed(AssembledFile),
    Failed(String),
    Cancelled,
}

/// Result of a single file upload.
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub source: String,
    /// Id of the attempt, if the source could be opened.
    pub file_id: Option<String>,
    pub outcome: UploadOutcome,
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UploadOutcome::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_config_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.max_completion_rounds, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn upload_config_rejects_zero_values() {
        let config = UploadConfig {
            chunk_size: 0,
            ..UploadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::InvalidConfiguration(_))
        ));

        let config = UploadConfig {
            concurrency: 0,
            ..UploadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(UploadError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn source_labels() {
        let path = UploadSource::from(PathBuf::from("/tmp/video.mkv"));
        assert_eq!(path.label(), "/tmp/video.mkv");

        let bytes = UploadSource::Bytes {
            name: "memo.txt".into(),
            data: Arc::from(&b"abc"[..]),
        };
        assert_eq!(bytes.label(), "memo.txt");
        let splitter = bytes.open(2).unwrap();
        assert_eq!(splitter.total_chunks(), 2);
    }

    #[test]
    fn terminal_events() {
        let done = UploadEvent::Cancelled { source: "a".into() };
        assert!(done.is_terminal());
        assert_eq!(done.source(), "a");

        let progress = UploadEvent::Progress {
            source: "b".into(),
            file_id: "f".into(),
            percent: 50,
        };
        assert!(!progress.is_terminal());
    }

    #[tokio::test]
    async fn event_sink_ignores_dropped_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new("a", tx);
        drop(rx);
        sink.emit(UploadEvent::Cancelled { source: "a".into() }).await;
        sink.try_emit(UploadEvent::Cancelled { source: "a".into() });
    }
}
