//! Chunk transmission with per-chunk retry and bounded concurrency.

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chunkferry_transfer::{ChunkDescriptor, ChunkSplitter, ProgressTracker, UploadSession};

use crate::connection::AssemblerConnection;
use crate::error::UploadError;
use crate::retry::{RetryConfig, with_retry};
use crate::types::{EventSink, UploadEvent};

/// Sends a file's chunks to an assembler.
///
/// With `concurrency == 1` chunks go out strictly in index order. Larger
/// values keep up to that many chunks in flight; acknowledgements may then
/// arrive in any order. Acknowledgements are applied to the session by the
/// task that owns it, never by the in-flight sends.
pub struct ChunkTransmitter<'a> {
    conn: &'a dyn AssemblerConnection,
    retry: RetryConfig,
    concurrency: usize,
    cancel: CancellationToken,
    events: Option<EventSink>,
}

impl<'a> ChunkTransmitter<'a> {
    pub fn new(
        conn: &'a dyn AssemblerConnection,
        retry: RetryConfig,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            retry,
            concurrency: concurrency.max(1),
            cancel,
            events: None,
        }
    }

    /// Reports progress and retries through `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Sends `indexes` and acknowledges each one on `session`.
    ///
    /// Cancellation is checked before every send. The first chunk that
    /// cannot be delivered aborts the call; sends still in flight are
    /// abandoned.
    pub async fn transmit(
        &self,
        splitter: &ChunkSplitter,
        session: &mut UploadSession,
        tracker: &mut ProgressTracker,
        indexes: Vec<u32>,
    ) -> Result<(), UploadError> {
        let total = session.total_chunks();
        let file_id = session.file_id().to_string();
        let mut queue = indexes.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.concurrency {
                let Some(index) = queue.next() else {
                    break;
                };
                if self.cancel.is_cancelled() {
                    return Err(UploadError::UserCancelled);
                }
                in_flight.push(self.send_chunk(splitter, &file_id, index, total));
            }

            let Some(result) = in_flight.next().await else {
                break;
            };
            let index = result?;
            if !session.acknowledge(index)? {
                debug!(file_id = %file_id, index, "chunk was already acknowledged");
            }
            report_progress(self.events.as_ref(), tracker, session).await;
        }

        Ok(())
    }

    /// Delivers one chunk, retrying transient failures.
    ///
    /// The payload is read fresh for each attempt and dropped as soon as the
    /// attempt finishes.
    async fn send_chunk(
        &self,
        splitter: &ChunkSplitter,
        file_id: &str,
        index: u32,
        total: u32,
    ) -> Result<u32, UploadError> {
        let conn = self.conn;
        let result = with_retry(
            &self.retry,
            &self.cancel,
            move |_attempt| async move {
                let chunk = read_chunk(splitter, index).await?;
                let ack = conn.upload_chunk(&chunk, total).await?;
                drop(chunk);
                if ack.chunk_index != index {
                    return Err(UploadError::Protocol(format!(
                        "acknowledged chunk {} for chunk {index}",
                        ack.chunk_index
                    )));
                }
                Ok::<_, UploadError>(ack)
            },
            |attempt, err| {
                warn!(file_id, index, attempt, "chunk send failed, retrying: {err}");
                if let Some(events) = &self.events {
                    events.try_emit(UploadEvent::ChunkRetry {
                        source: events.source().to_string(),
                        file_id: file_id.to_string(),
                        index,
                        attempt,
                        error: err.to_string(),
                    });
                }
            },
        )
        .await;

        match result {
            Ok(ack) => {
                debug!(
                    file_id,
                    index,
                    received = ack.received_count,
                    duplicate = ack.duplicate,
                    "chunk acknowledged"
                );
                Ok(index)
            }
            Err(
                e @ (UploadError::Remote { .. }
                | UploadError::Transport(_)
                | UploadError::Timeout
                | UploadError::Protocol(_)),
            ) => Err(UploadError::ChunkTransmission {
                index,
                last_error: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

/// Reads chunk `index` off the async runtime.
async fn read_chunk(splitter: &ChunkSplitter, index: u32) -> Result<ChunkDescriptor, UploadError> {
    let splitter = splitter.clone();
    Ok(tokio::task::spawn_blocking(move || splitter.read_chunk(index)).await??)
}

/// Recomputes progress and emits an event when it advanced.
pub(crate) async fn report_progress(
    events: Option<&EventSink>,
    tracker: &mut ProgressTracker,
    session: &UploadSession,
) {
    let before = tracker.last();
    let percent = tracker.observe(session);
    if percent > before
        && let Some(events) = events
    {
        events
            .emit(UploadEvent::Progress {
                source: events.source().to_string(),
                file_id: session.file_id().to_string(),
                percent,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chunkferry_protocol::FileDescriptor;
    use chunkferry_protocol::messages::{
        CompleteUploadResponse, RegisterMetadataResponse, UploadChunkResponse,
        UploadStatusResponse,
    };
    use tokio::sync::mpsc;

    use crate::connection::ConnFuture;

    /// Records every chunk send; fails chosen indexes a scripted number of times.
    #[derive(Default)]
    struct MockConn {
        sent: Mutex<Vec<u32>>,
        failures: Mutex<HashMap<u32, (u32, i32)>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockConn {
        fn fail(self, index: u32, times: u32, code: i32) -> Self {
            self.failures.lock().unwrap().insert(index, (times, code));
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn sent(&self) -> Vec<u32> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl AssemblerConnection for MockConn {
        fn register<'a>(
            &'a self,
            _file: &'a FileDescriptor,
        ) -> ConnFuture<'a, RegisterMetadataResponse> {
            Box::pin(async { Err(UploadError::Protocol("unused".into())) })
        }

        fn upload_chunk<'a>(
            &'a self,
            chunk: &'a ChunkDescriptor,
            _total_chunks: u32,
        ) -> ConnFuture<'a, UploadChunkResponse> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                self.sent.lock().unwrap().push(chunk.index);
                let scripted = {
                    let mut failures = self.failures.lock().unwrap();
                    match failures.get_mut(&chunk.index) {
                        Some((left, code)) if *left > 0 => {
                            *left -= 1;
                            Some(*code)
                        }
                        _ => None,
                    }
                };
                if let Some(code) = scripted {
                    return Err(UploadError::Remote {
                        code,
                        message: "scripted failure".into(),
                    });
                }
                Ok(UploadChunkResponse {
                    file_id: chunk.file_id.clone(),
                    chunk_index: chunk.index,
                    received_count: 0,
                    duplicate: false,
                })
            })
        }

        fn complete<'a>(&'a self, _file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse> {
            Box::pin(async { Err(UploadError::Protocol("unused".into())) })
        }

        fn status<'a>(&'a self, _file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse> {
            Box::pin(async { Err(UploadError::Protocol("unused".into())) })
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(400),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn registered(splitter: &ChunkSplitter) -> UploadSession {
        let mut session = UploadSession::new(splitter.descriptor().clone());
        session.register(&[]).unwrap();
        session
    }

    fn splitter(len: usize, chunk_size: u64) -> ChunkSplitter {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        ChunkSplitter::from_bytes("data.bin", data, chunk_size).unwrap()
    }

    #[tokio::test]
    async fn sequential_sends_in_index_order() {
        let conn = MockConn::default();
        let splitter = splitter(100, 10);
        let mut session = registered(&splitter);
        let mut tracker = ProgressTracker::new();

        let tx = ChunkTransmitter::new(&conn, fast_retry(3), 1, CancellationToken::new());
        let indexes = session.unacked();
        tx.transmit(&splitter, &mut session, &mut tracker, indexes)
            .await
            .unwrap();

        assert_eq!(conn.sent(), (0..10).collect::<Vec<_>>());
        assert!(session.is_complete());
        assert_eq!(tracker.last(), 99);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let conn = MockConn::default().with_delay(Duration::from_millis(20));
        let splitter = splitter(160, 10);
        let mut session = registered(&splitter);
        let mut tracker = ProgressTracker::new();

        let tx = ChunkTransmitter::new(&conn, fast_retry(3), 4, CancellationToken::new());
        let indexes = session.unacked();
        tx.transmit(&splitter, &mut session, &mut tracker, indexes)
            .await
            .unwrap();

        assert!(session.is_complete());
        assert_eq!(conn.max_in_flight.load(Ordering::SeqCst), 4);
        let mut sent = conn.sent();
        sent.sort_unstable();
        assert_eq!(sent, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_and_reported() {
        let conn = MockConn::default().fail(1, 2, 500);
        let splitter = splitter(30, 10);
        let mut session = registered(&splitter);
        let mut tracker = ProgressTracker::new();
        let (events_tx, mut events_rx) = mpsc::channel(64);

        let tx = ChunkTransmitter::new(&conn, fast_retry(5), 1, CancellationToken::new())
            .with_events(EventSink::new("data.bin", events_tx));
        let indexes = session.unacked();
        tx.transmit(&splitter, &mut session, &mut tracker, indexes)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(conn.sent(), vec![0, 1, 1, 1, 2]);
        assert!(session.is_complete());

        let mut retries = Vec::new();
        let mut percents = Vec::new();
        while let Some(event) = events_rx.recv().await {
            match event {
                UploadEvent::ChunkRetry { index, attempt, .. } => retries.push((index, attempt)),
                UploadEvent::Progress { percent, .. } => percents.push(percent),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(retries, vec![(1, 1), (1, 2)]);
        assert_eq!(percents, vec![33, 67, 99]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_name_the_chunk() {
        let conn = MockConn::default().fail(2, u32::MAX, 500);
        let splitter = splitter(50, 10);
        let mut session = registered(&splitter);
        let mut tracker = ProgressTracker::new();

        let tx = ChunkTransmitter::new(&conn, fast_retry(3), 1, CancellationToken::new());
        let indexes = session.unacked();
        let err = tx
            .transmit(&splitter, &mut session, &mut tracker, indexes)
            .await
            .unwrap_err();

        match err {
            UploadError::ChunkTransmission { index, last_error } => {
                assert_eq!(index, 2);
                assert!(last_error.contains("500"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(conn.sent(), vec![0, 1, 2, 2, 2]);
        assert_eq!(session.acked_count(), 2);
    }

    #[tokio::test]
    async fn fatal_reject_is_not_retried() {
        let conn = MockConn::default().fail(0, 1, 404);
        let splitter = splitter(20, 10);
        let mut session = registered(&splitter);
        let mut tracker = ProgressTracker::new();

        let tx = ChunkTransmitter::new(&conn, fast_retry(5), 1, CancellationToken::new());
        let indexes = session.unacked();
        let err = tx
            .transmit(&splitter, &mut session, &mut tracker, indexes)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ChunkTransmission { index: 0, .. }));
        assert_eq!(conn.sent(), vec![0]);
    }

    #[tokio::test]
    async fn cancelled_before_any_send() {
        let conn = MockConn::default();
        let splitter = splitter(20, 10);
        let mut session = registered(&splitter);
        let mut tracker = ProgressTracker::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tx = ChunkTransmitter::new(&conn, fast_retry(3), 2, cancel);
        let indexes = session.unacked();
        let err = tx
            .transmit(&splitter, &mut session, &mut tracker, indexes)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UserCancelled));
        assert!(conn.sent().is_empty());
    }

    #[tokio::test]
    async fn resend_of_acked_index_keeps_count() {
        let conn = MockConn::default();
        let splitter = splitter(30, 10);
        let mut session = registered(&splitter);
        let mut tracker = ProgressTracker::new();

        let tx = ChunkTransmitter::new(&conn, fast_retry(3), 1, CancellationToken::new());
        tx.transmit(&splitter, &mut session, &mut tracker, vec![0, 1, 2])
            .await
            .unwrap();
        tx.transmit(&splitter, &mut session, &mut tracker, vec![1])
            .await
            .unwrap();

        assert_eq!(session.acked_count(), 3);
        assert_eq!(conn.sent(), vec![0, 1, 2, 1]);
    }
}
