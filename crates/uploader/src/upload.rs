//! Per-file upload driver.
//!
//! [`FileUpload`] owns one file's [`UploadSession`] for its whole life:
//! register, transmit, complete, and resend whatever the assembler reports
//! missing until the file is assembled or the round budget is spent.

use chunkferry_protocol::AssembledFile;
use chunkferry_protocol::messages::CompleteUploadResponse;
use chunkferry_transfer::{
    ChunkSplitter, FailReason, ProgressTracker, UploadSession, validate_file_name,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::AssemblerConnection;
use crate::error::UploadError;
use crate::retry::with_retry;
use crate::transmitter::{ChunkTransmitter, report_progress};
use crate::types::{EventSink, UploadConfig, UploadEvent};

/// Uploads a single file to one assembler.
pub struct FileUpload<'a> {
    conn: &'a dyn AssemblerConnection,
    config: &'a UploadConfig,
    cancel: CancellationToken,
    events: Option<EventSink>,
}

impl<'a> FileUpload<'a> {
    pub fn new(
        conn: &'a dyn AssemblerConnection,
        config: &'a UploadConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            config,
            cancel,
            events: None,
        }
    }

    /// Reports registration, progress and retries through `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs the upload to completion.
    ///
    /// Returns the assembled file, or the error that ended the session.
    pub async fn run(&self, splitter: &ChunkSplitter) -> Result<AssembledFile, UploadError> {
        let mut session = UploadSession::new(splitter.descriptor().clone());
        self.run_session(splitter, &mut session).await
    }

    /// Runs the upload on a caller-owned `session`, which is left
    /// `Completed` or `Failed` when this returns.
    pub async fn run_session(
        &self,
        splitter: &ChunkSplitter,
        session: &mut UploadSession,
    ) -> Result<AssembledFile, UploadError> {
        let mut tracker = ProgressTracker::new();

        let result = self.drive(splitter, session, &mut tracker).await;
        if let Err(e) = &result {
            let reason = match e {
                UploadError::UserCancelled => FailReason::UserCancelled,
                other => FailReason::Error(other.to_string()),
            };
            session.fail(reason);
        }
        debug!(file_id = %session.file_id(), status = %session.status(), "session finished");
        result
    }

    async fn drive(
        &self,
        splitter: &ChunkSplitter,
        session: &mut UploadSession,
        tracker: &mut ProgressTracker,
    ) -> Result<AssembledFile, UploadError> {
        self.config.validate()?;
        validate_file_name(&session.descriptor().file_name)?;
        let file_id = session.file_id().to_string();

        self.register(session).await?;
        report_progress(self.events.as_ref(), tracker, session).await;

        let mut transmitter = ChunkTransmitter::new(
            self.conn,
            self.config.retry.clone(),
            self.config.concurrency,
            self.cancel.clone(),
        );
        if let Some(events) = &self.events {
            transmitter = transmitter.with_events(events.clone());
        }

        let mut to_send = session.unacked();
        let mut rounds = 0;
        loop {
            transmitter
                .transmit(splitter, session, tracker, to_send)
                .await?;
            if self.cancel.is_cancelled() {
                return Err(UploadError::UserCancelled);
            }

            session.begin_completion()?;
            let response = with_retry(
                &self.config.retry,
                &self.cancel,
                |_| self.conn.complete(&file_id),
                |attempt, err| warn!(file_id = %file_id, attempt, "completion failed, retrying: {err}"),
            )
            .await?;

            match response {
                CompleteUploadResponse::Assembled { file } => {
                    self.verify(splitter, &file).await?;
                    session.completion_succeeded(file.clone())?;
                    report_progress(self.events.as_ref(), tracker, session).await;
                    info!(
                        file_id = %file_id,
                        path = %file.path,
                        size = file.file_size,
                        "upload completed"
                    );
                    return Ok(file);
                }
                CompleteUploadResponse::Missing {
                    missing_indexes, ..
                } => {
                    if missing_indexes.is_empty() {
                        return Err(UploadError::Protocol(
                            "assembler reported an empty missing set".into(),
                        ));
                    }
                    rounds += 1;
                    if rounds > self.config.max_completion_rounds {
                        warn!(
                            file_id = %file_id,
                            missing = ?missing_indexes,
                            "giving up after {} completion rounds",
                            self.config.max_completion_rounds
                        );
                        return Err(UploadError::PartialUpload {
                            missing: missing_indexes,
                        });
                    }
                    warn!(
                        file_id = %file_id,
                        round = rounds,
                        missing = ?missing_indexes,
                        "assembler reported missing chunks, resending"
                    );
                    session.completion_incomplete(&missing_indexes)?;
                    to_send = session.pending_resend();
                }
            }
        }
    }

    /// Registers the file, pre-acknowledging chunks the assembler already holds.
    async fn register(&self, session: &mut UploadSession) -> Result<(), UploadError> {
        let descriptor = session.descriptor().clone();
        let response = with_retry(
            &self.config.retry,
            &self.cancel,
            |_| self.conn.register(&descriptor),
            |attempt, err| {
                warn!(file_id = %descriptor.file_id, attempt, "registration failed, retrying: {err}")
            },
        )
        .await
        .map_err(|e| match e {
            UploadError::UserCancelled => UploadError::UserCancelled,
            other => UploadError::Registration(other.to_string()),
        })?;

        if response.file_id != descriptor.file_id {
            return Err(UploadError::Registration(format!(
                "assembler registered {} instead of {}",
                response.file_id, descriptor.file_id
            )));
        }
        session
            .register(&response.received_indexes)
            .map_err(|e| UploadError::Registration(e.to_string()))?;

        info!(
            file_id = %descriptor.file_id,
            file_name = %descriptor.file_name,
            total_chunks = descriptor.total_chunks,
            resumed = response.resumed,
            already_received = session.acked_count(),
            "file registered"
        );
        if let Some(events) = &self.events {
            events
                .emit(UploadEvent::Registered {
                    source: events.source().to_string(),
                    file_id: descriptor.file_id.clone(),
                    total_chunks: descriptor.total_chunks,
                    already_received: session.acked_count(),
                })
                .await;
        }
        Ok(())
    }

    /// Checks the assembled digest against the local source.
    async fn verify(&self, splitter: &ChunkSplitter, file: &AssembledFile) -> Result<(), UploadError> {
        if !self.config.verify_digest {
            return Ok(());
        }
        let source = splitter.clone();
        let expected = tokio::task::spawn_blocking(move || source.digest()).await??;
        if !expected.eq_ignore_ascii_case(&file.sha256) {
            return Err(UploadError::DigestMismatch {
                expected,
                actual: file.sha256.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chunkferry_assembler::{Assembler, MemoryChunkStore};
    use chunkferry_protocol::FileDescriptor;
    use chunkferry_protocol::messages::{
        RegisterMetadataResponse, UploadChunkResponse, UploadStatusResponse,
    };
    use chunkferry_protocol::SessionStatus;
    use chunkferry_transfer::ChunkDescriptor;
    use tokio::sync::mpsc;

    use crate::connection::{ConnFuture, LocalConnection};
    use crate::retry::RetryConfig;

    /// Local connection that acknowledges some chunks without storing them.
    struct LossyConn {
        inner: LocalConnection,
        /// Index -> number of sends to swallow.
        drop_sends: Mutex<Vec<(u32, u32)>>,
        completions: Mutex<u32>,
    }

    impl LossyConn {
        fn new(inner: LocalConnection, drops: Vec<(u32, u32)>) -> Self {
            Self {
                inner,
                drop_sends: Mutex::new(drops),
                completions: Mutex::new(0),
            }
        }

        fn swallow(&self, index: u32) -> bool {
            let mut drops = self.drop_sends.lock().unwrap();
            match drops.iter_mut().find(|(i, left)| *i == index && *left > 0) {
                Some((_, left)) => {
                    *left -= 1;
                    true
                }
                None => false,
            }
        }
    }

    impl AssemblerConnection for LossyConn {
        fn register<'a>(
            &'a self,
            file: &'a FileDescriptor,
        ) -> ConnFuture<'a, RegisterMetadataResponse> {
            self.inner.register(file)
        }

        fn upload_chunk<'a>(
            &'a self,
            chunk: &'a ChunkDescriptor,
            total_chunks: u32,
        ) -> ConnFuture<'a, UploadChunkResponse> {
            if self.swallow(chunk.index) {
                return Box::pin(async move {
                    Ok(UploadChunkResponse {
                        file_id: chunk.file_id.clone(),
                        chunk_index: chunk.index,
                        received_count: 0,
                        duplicate: false,
                    })
                });
            }
            self.inner.upload_chunk(chunk, total_chunks)
        }

        fn complete<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse> {
            *self.completions.lock().unwrap() += 1;
            self.inner.complete(file_id)
        }

        fn status<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse> {
            self.inner.status(file_id)
        }
    }

    async fn local() -> (LocalConnection, MemoryChunkStore) {
        let store = MemoryChunkStore::new();
        let assembler = Assembler::open(Arc::new(store.clone())).await.unwrap();
        (LocalConnection::new(Arc::new(assembler)), store)
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn config() -> UploadConfig {
        UploadConfig {
            retry: RetryConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                ..RetryConfig::default()
            },
            ..UploadConfig::default()
        }
    }

    #[tokio::test]
    async fn uploads_three_chunk_file() {
        let (conn, store) = local().await;
        let bytes = data(2_500_000);
        let splitter = ChunkSplitter::from_bytes("big.bin", bytes.clone(), 1_048_576).unwrap();
        assert_eq!(splitter.total_chunks(), 3);

        let config = config();
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let upload = FileUpload::new(&conn, &config, CancellationToken::new())
            .with_events(EventSink::new("big.bin", events_tx));
        let file = upload.run(&splitter).await.unwrap();
        drop(upload);

        assert_eq!(file.file_size, 2_500_000);
        assert_eq!(file.total_chunks, 3);
        assert_eq!(store.artifact(&file.file_id).unwrap(), bytes);

        let mut percents = Vec::new();
        let mut registered = false;
        while let Some(event) = events_rx.recv().await {
            match event {
                UploadEvent::Registered { total_chunks, already_received, .. } => {
                    assert_eq!(total_chunks, 3);
                    assert_eq!(already_received, 0);
                    registered = true;
                }
                UploadEvent::Progress { percent, .. } => percents.push(percent),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(registered);
        assert_eq!(percents, vec![33, 67, 99, 100]);
    }

    #[tokio::test]
    async fn missing_chunk_is_resent_in_next_round() {
        let (local, store) = local().await;
        let conn = LossyConn::new(local, vec![(1, 1)]);
        let bytes = data(30);
        let splitter = ChunkSplitter::from_bytes("gap.bin", bytes.clone(), 10).unwrap();

        let config = config();
        let file = FileUpload::new(&conn, &config, CancellationToken::new())
            .run(&splitter)
            .await
            .unwrap();

        assert_eq!(*conn.completions.lock().unwrap(), 2);
        assert_eq!(store.artifact(&file.file_id).unwrap(), bytes);
    }

    #[tokio::test]
    async fn persistent_gap_fails_with_partial_upload() {
        let (local, _store) = local().await;
        let conn = LossyConn::new(local, vec![(2, u32::MAX)]);
        let splitter = ChunkSplitter::from_bytes("hole.bin", data(40), 10).unwrap();

        let config = UploadConfig {
            max_completion_rounds: 2,
            ..config()
        };
        let err = FileUpload::new(&conn, &config, CancellationToken::new())
            .run(&splitter)
            .await
            .unwrap_err();

        match err {
            UploadError::PartialUpload { missing } => assert_eq!(missing, vec![2]),
            other => panic!("unexpected {other:?}"),
        }
        // Initial completion plus two resend rounds.
        assert_eq!(*conn.completions.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn resumed_registration_skips_held_chunks() {
        let (local, store) = local().await;
        let bytes = data(50);
        let splitter = ChunkSplitter::from_bytes("resume.bin", bytes.clone(), 10).unwrap();
        let descriptor = splitter.descriptor().clone();

        // An earlier attempt under the same id delivered chunks 0 and 3.
        local.register(&descriptor).await.unwrap();
        for index in [0, 3] {
            let chunk = splitter.read_chunk(index).unwrap();
            local.upload_chunk(&chunk, descriptor.total_chunks).await.unwrap();
        }

        let sent = Arc::new(Mutex::new(HashSet::new()));
        struct Recording {
            inner: LocalConnection,
            sent: Arc<Mutex<HashSet<u32>>>,
        }
        impl AssemblerConnection for Recording {
            fn register<'a>(
                &'a self,
                file: &'a FileDescriptor,
            ) -> ConnFuture<'a, RegisterMetadataResponse> {
                self.inner.register(file)
            }
            fn upload_chunk<'a>(
                &'a self,
                chunk: &'a ChunkDescriptor,
                total_chunks: u32,
            ) -> ConnFuture<'a, UploadChunkResponse> {
                self.sent.lock().unwrap().insert(chunk.index);
                self.inner.upload_chunk(chunk, total_chunks)
            }
            fn complete<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse> {
                self.inner.complete(file_id)
            }
            fn status<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse> {
                self.inner.status(file_id)
            }
        }

        let conn = Recording {
            inner: local,
            sent: sent.clone(),
        };
        let config = config();
        let file = FileUpload::new(&conn, &config, CancellationToken::new())
            .run(&splitter)
            .await
            .unwrap();

        assert_eq!(*sent.lock().unwrap(), HashSet::from([1, 2, 4]));
        assert_eq!(store.artifact(&file.file_id).unwrap(), bytes);
    }

    #[tokio::test]
    async fn empty_file_completes_without_chunks() {
        let (conn, store) = local().await;
        let splitter = ChunkSplitter::from_bytes("empty.txt", Vec::new(), 1024).unwrap();

        let config = config();
        let file = FileUpload::new(&conn, &config, CancellationToken::new())
            .run(&splitter)
            .await
            .unwrap();

        assert_eq!(file.file_size, 0);
        assert_eq!(store.artifact(&file.file_id).unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn rejected_registration_is_fatal() {
        let (conn, _store) = local().await;
        let splitter = ChunkSplitter::from_bytes("a.bin", data(10), 4).unwrap();
        let mut conflicting = splitter.descriptor().clone();
        conflicting.file_size = 9;
        conflicting.total_chunks = 3;
        conn.register(&conflicting).await.unwrap();

        let config = config();
        let err = FileUpload::new(&conn, &config, CancellationToken::new())
            .run(&splitter)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Registration(m) if m.contains("409")));
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected_up_front() {
        let (conn, _store) = local().await;
        let splitter = ChunkSplitter::from_bytes("a.bin", data(10), 4).unwrap();
        let config = UploadConfig {
            concurrency: 0,
            ..config()
        };
        let err = FileUpload::new(&conn, &config, CancellationToken::new())
            .run(&splitter)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn cancelled_upload_reports_user_cancelled() {
        let (conn, store) = local().await;
        let splitter = ChunkSplitter::from_bytes("a.bin", data(10), 4).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = config();
        let err = FileUpload::new(&conn, &config, cancel)
            .run(&splitter)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UserCancelled));
        assert_eq!(store.stored_chunks(&splitter.descriptor().file_id), 0);
    }

    /// Local connection that cancels `cancel` once chunk `after` is stored.
    struct CancelAfter {
        inner: LocalConnection,
        cancel: CancellationToken,
        after: u32,
        sent: Mutex<Vec<u32>>,
    }

    impl AssemblerConnection for CancelAfter {
        fn register<'a>(
            &'a self,
            file: &'a FileDescriptor,
        ) -> ConnFuture<'a, RegisterMetadataResponse> {
            self.inner.register(file)
        }

        fn upload_chunk<'a>(
            &'a self,
            chunk: &'a ChunkDescriptor,
            total_chunks: u32,
        ) -> ConnFuture<'a, UploadChunkResponse> {
            self.sent.lock().unwrap().push(chunk.index);
            Box::pin(async move {
                let ack = self.inner.upload_chunk(chunk, total_chunks).await;
                if chunk.index == self.after {
                    self.cancel.cancel();
                }
                ack
            })
        }

        fn complete<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse> {
            self.inner.complete(file_id)
        }

        fn status<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse> {
            self.inner.status(file_id)
        }
    }

    #[tokio::test]
    async fn cancel_mid_transfer_stops_sending() {
        for concurrency in [1usize, 3] {
            let (inner, store) = local().await;
            let cancel = CancellationToken::new();
            let conn = CancelAfter {
                inner,
                cancel: cancel.clone(),
                after: 3,
                sent: Mutex::new(Vec::new()),
            };
            let splitter = ChunkSplitter::from_bytes("a.bin", data(40), 4).unwrap();
            let mut session = UploadSession::new(splitter.descriptor().clone());

            let config = UploadConfig {
                concurrency,
                ..config()
            };
            let err = FileUpload::new(&conn, &config, cancel)
                .run_session(&splitter, &mut session)
                .await
                .unwrap_err();

            assert!(matches!(err, UploadError::UserCancelled));
            assert_eq!(session.status(), SessionStatus::Failed);
            assert_eq!(session.failure(), Some(&FailReason::UserCancelled));

            let sent = conn.sent.lock().unwrap().clone();
            let highest = sent.iter().copied().max().unwrap();
            assert!(
                highest <= 3 + concurrency as u32,
                "chunk {highest} sent after cancelling at 3 with concurrency {concurrency}"
            );
            assert!(store.stored_chunks(&splitter.descriptor().file_id) < 10);
            assert!(store.artifact(&splitter.descriptor().file_id).is_none());
        }
    }
}
