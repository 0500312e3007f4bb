//! Upload orchestrator for multi-file parallel uploads.
//!
//! Runs one task per file against a shared assembler connection, forwards
//! their events to a single channel, and supports cancellation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::AssemblerConnection;
use crate::error::UploadError;
use crate::types::{EventSink, UploadConfig, UploadEvent, UploadOutcome, UploadResult, UploadSource};
use crate::upload::FileUpload;

/// Orchestrates the upload of several files.
pub struct UploadOrchestrator {
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl Default for UploadOrchestrator {
    fn default() -> Self {
        Self::new(UploadConfig::default())
    }
}

impl UploadOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// The receiver must be drained while an upload runs; a full channel
    /// stalls the uploads.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns the cancellation token shared by every file.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads every source concurrently, one task per file.
    ///
    /// A failing file does not affect the others. Returns one result per
    /// source, in input order.
    pub async fn upload(
        &self,
        conn: Arc<dyn AssemblerConnection>,
        sources: Vec<UploadSource>,
    ) -> Vec<UploadResult> {
        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let label = source.label();
            let task = upload_one(
                conn.clone(),
                self.config.clone(),
                self.cancel.clone(),
                EventSink::new(label.clone(), self.events_tx.clone()),
                source,
            );
            handles.push((label, tokio::spawn(task)));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(source = %label, "upload task failed: {e}");
                    let error = format!("upload task failed: {e}");
                    let _ = self
                        .events_tx
                        .send(UploadEvent::Failed {
                            source: label.clone(),
                            error: error.clone(),
                        })
                        .await;
                    results.push(UploadResult {
                        source: label,
                        file_id: None,
                        outcome: UploadOutcome::Failed(error),
                    });
                }
            }
        }
        results
    }
}

/// Uploads one source and reports its terminal event.
async fn upload_one(
    conn: Arc<dyn AssemblerConnection>,
    config: UploadConfig,
    cancel: CancellationToken,
    events: EventSink,
    source: UploadSource,
) -> UploadResult {
    let label = events.source().to_string();

    let opened = if cancel.is_cancelled() {
        Err(UploadError::UserCancelled)
    } else {
        let chunk_size = config.chunk_size;
        let src = source.clone();
        match tokio::task::spawn_blocking(move || src.open(chunk_size)).await {
            Ok(Ok(splitter)) => Ok(splitter),
            Ok(Err(e)) => Err(UploadError::from(e)),
            Err(e) => Err(UploadError::from(e)),
        }
    };

    let (file_id, result) = match opened {
        Ok(splitter) => {
            let file_id = splitter.descriptor().file_id.clone();
            let upload =
                FileUpload::new(conn.as_ref(), &config, cancel).with_events(events.clone());
            (Some(file_id), upload.run(&splitter).await)
        }
        Err(e) => (None, Err(e)),
    };

    let outcome = match result {
        Ok(file) => {
            info!(source = %label, file_id = %file.file_id, "upload completed");
            events
                .emit(UploadEvent::Completed {
                    source: label.clone(),
                    file: file.clone(),
                })
                .await;
            UploadOutcome::Completed(file)
        }
        Err(UploadError::UserCancelled) => {
            warn!(source = %label, "upload cancelled");
            events
                .emit(UploadEvent::Cancelled {
                    source: label.clone(),
                })
                .await;
            UploadOutcome::Cancelled
        }
        Err(e) => {
            let err_msg = e.to_string();
            error!(source = %label, error = %err_msg, "upload failed");
            events
                .emit(UploadEvent::Failed {
                    source: label.clone(),
                    error: err_msg.clone(),
                })
                .await;
            UploadOutcome::Failed(err_msg)
        }
    };

    UploadResult {
        source: label,
        file_id,
        outcome,
    }
}
