//! WebSocket client for uploader-to-assembler communication.
//!
//! Implements the request-response pattern with UUID correlation for both
//! JSON requests and binary chunk frames, plus ping keepalive.

use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::info;

use chunkferry_protocol::constants::{
    MessageType, WS_BINARY_REQUEST_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_REQUEST_TIMEOUT,
};
use chunkferry_protocol::messages::{
    CompleteUploadRequest, CompleteUploadResponse, RegisterMetadataRequest,
    RegisterMetadataResponse, UploadChunkResponse, UploadStatusRequest, UploadStatusResponse,
};
use chunkferry_protocol::{
    ChunkHeader, EnvelopeError, FileDescriptor, FrameError, Message, encode_chunk_frame,
};
use chunkferry_transfer::ChunkDescriptor;

use crate::connection::{AssemblerConnection, ConnFuture};
use crate::error::UploadError;
use crate::pumps::PendingRequests;

/// Errors from the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum WsClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("assembler error {code}: {message}")]
    Remote { code: i32, message: String },
}

impl From<WsClientError> for UploadError {
    fn from(e: WsClientError) -> Self {
        match e {
            WsClientError::Ws(e) => Self::Transport(e.to_string()),
            WsClientError::Closed => Self::Transport("connection closed".into()),
            WsClientError::Timeout => Self::Timeout,
            WsClientError::Remote { code, message } => Self::Remote { code, message },
            WsClientError::Json(e) => Self::Json(e),
            WsClientError::Frame(e) => Self::Protocol(e.to_string()),
        }
    }
}

impl From<EnvelopeError> for UploadError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Remote { code, message } => Self::Remote { code, message },
            EnvelopeError::Json(e) => Self::Json(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// WebSocket client connected to one assembler.
///
/// Cheap to share behind an `Arc`; any number of requests may be in flight
/// at once.
pub struct WsClient {
    url: String,
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingRequests,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Connects to an assembler at `url` (e.g. `ws://127.0.0.1:7001`).
    pub async fn connect(url: &str) -> Result<Self, WsClientError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending = PendingRequests::default();
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let pending = pending.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(read, pending, write_tx, cancel))
        };

        info!(url, "connected to assembler");
        Ok(Self {
            url: url.to_string(),
            write_tx,
            pending,
            _read_handle: read_handle,
            _write_handle: write_handle,
            cancel,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `false` once the connection has been closed or lost.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Sends a request and waits for the response.
    pub async fn send_request<T: Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, WsClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = match payload {
            Some(p) => Message::with_payload(&id, msg_type, p)?,
            None => Message::bare(&id, msg_type),
        };
        let json = serde_json::to_string(&msg)?;
        self.round_trip(id, tungstenite::Message::Text(json.into()), WS_REQUEST_TIMEOUT)
            .await
    }

    /// Sends one chunk frame and waits for its text response.
    ///
    /// Wire format: `[4 bytes big-endian header length][JSON header][payload]`.
    /// A fresh UUID replaces `header.id` for request-response correlation.
    pub async fn send_chunk(
        &self,
        mut header: ChunkHeader,
        payload: &[u8],
    ) -> Result<Message, WsClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        header.id = id.clone();
        let frame = encode_chunk_frame(&header, payload)?;
        // Binary transfers use a longer timeout to absorb slow disks on the
        // assembler side.
        self.round_trip(
            id,
            tungstenite::Message::Binary(frame.into()),
            WS_BINARY_REQUEST_TIMEOUT,
        )
        .await
    }

    async fn round_trip(
        &self,
        id: String,
        frame: tungstenite::Message,
        timeout: Duration,
    ) -> Result<Message, WsClientError> {
        if !self.is_connected() {
            return Err(WsClientError::Closed);
        }

        // The guard unregisters `id` on every exit, including this future
        // being dropped by a caller's own timeout or cancellation.
        let (_guard, rx) = self.pending.register(&id);

        if self.write_tx.send(frame).await.is_err() {
            return Err(WsClientError::Closed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => {
                if let Some(err) = &resp.error {
                    return Err(WsClientError::Remote {
                        code: err.code,
                        message: err.message.clone(),
                    });
                }
                Ok(resp)
            }
            Ok(Err(_)) => Err(WsClientError::Closed),
            Err(_) => Err(WsClientError::Timeout),
        }
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
        self.cancel.cancel();
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
    }
}

impl AssemblerConnection for WsClient {
    fn register<'a>(&'a self, file: &'a FileDescriptor) -> ConnFuture<'a, RegisterMetadataResponse> {
        Box::pin(async move {
            let req = RegisterMetadataRequest { file: file.clone() };
            let resp = self
                .send_request(MessageType::RegisterMetadata, Some(&req))
                .await?;
            Ok(resp.into_payload(MessageType::RegisterMetadataResponse)?)
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        chunk: &'a ChunkDescriptor,
        total_chunks: u32,
    ) -> ConnFuture<'a, UploadChunkResponse> {
        Box::pin(async move {
            let header = ChunkHeader {
                id: String::new(),
                file_id: chunk.file_id.clone(),
                chunk_index: chunk.index,
                total_chunks,
                checksum: chunk.checksum.clone(),
            };
            let resp = self.send_chunk(header, &chunk.payload).await?;
            Ok(resp.into_payload(MessageType::UploadChunkResponse)?)
        })
    }

    fn complete<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, CompleteUploadResponse> {
        Box::pin(async move {
            let req = CompleteUploadRequest {
                file_id: file_id.to_string(),
            };
            let resp = self
                .send_request(MessageType::CompleteUpload, Some(&req))
                .await?;
            Ok(resp.into_payload(MessageType::CompleteUploadResponse)?)
        })
    }

    fn status<'a>(&'a self, file_id: &'a str) -> ConnFuture<'a, UploadStatusResponse> {
        Box::pin(async move {
            let req = UploadStatusRequest {
                file_id: file_id.to_string(),
            };
            let resp = self
                .send_request(MessageType::UploadStatus, Some(&req))
                .await?;
            Ok(resp.into_payload(MessageType::UploadStatusResponse)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chunkferry_protocol::parse_chunk_frame;

    /// Client wired to channels instead of a socket.
    fn detached() -> (WsClient, mpsc::Receiver<tungstenite::Message>) {
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(16);
        let client = WsClient {
            url: "ws://test".into(),
            write_tx,
            pending: PendingRequests::default(),
            _read_handle: tokio::spawn(async {}),
            _write_handle: tokio::spawn(async {}),
            cancel: CancellationToken::new(),
        };
        (client, write_rx)
    }

    #[test]
    fn ws_client_error_maps_to_upload_error() {
        assert!(matches!(
            UploadError::from(WsClientError::Timeout),
            UploadError::Timeout
        ));
        let closed = UploadError::from(WsClientError::Closed);
        assert!(closed.is_transient());
        let remote = UploadError::from(WsClientError::Remote {
            code: 409,
            message: "conflict".into(),
        });
        assert!(matches!(remote, UploadError::Remote { code: 409, .. }));
        assert!(!remote.is_transient());
    }

    #[test]
    fn wrong_response_type_is_a_protocol_error() {
        let resp = UploadStatusResponse {
            file_id: "f1".into(),
            total_chunks: 2,
            received_indexes: vec![0],
            assembled: false,
        };
        let msg = Message::with_payload("m1", MessageType::UploadStatusResponse, &resp).unwrap();
        let err = msg
            .into_payload::<UploadStatusResponse>(MessageType::UploadChunkResponse)
            .map_err(UploadError::from)
            .unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));

        let empty = Message::bare("m2", MessageType::UploadStatusResponse);
        let err = empty
            .into_payload::<UploadStatusResponse>(MessageType::UploadStatusResponse)
            .map_err(UploadError::from)
            .unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));
    }

    #[tokio::test]
    async fn send_chunk_builds_correct_wire_format() {
        let (client, mut write_rx) = detached();
        let client = Arc::new(client);

        let header = ChunkHeader {
            id: "ignored".into(),
            file_id: "f1".into(),
            chunk_index: 3,
            total_chunks: 5,
            checksum: "abc".into(),
        };
        let sender = client.clone();
        let send_handle = tokio::spawn(async move {
            let _ = sender.send_chunk(header, b"hello binary").await;
        });

        let frame = match write_rx.recv().await.unwrap() {
            tungstenite::Message::Binary(b) => b.to_vec(),
            other => panic!("expected binary frame, got {other:?}"),
        };
        let parsed = parse_chunk_frame(&frame).unwrap();
        assert_eq!(parsed.header.file_id, "f1");
        assert_eq!(parsed.header.chunk_index, 3);
        assert_eq!(parsed.header.total_chunks, 5);
        assert_ne!(parsed.header.id, "ignored");
        assert!(uuid::Uuid::parse_str(&parsed.header.id).is_ok());
        assert_eq!(parsed.payload, b"hello binary");

        // The request is registered under the injected id.
        assert!(client.pending.contains(&parsed.header.id));
        send_handle.abort();
    }

    #[tokio::test]
    async fn response_completes_request() {
        let (client, mut write_rx) = detached();
        let client = Arc::new(client);

        let requester = client.clone();
        let handle = tokio::spawn(async move {
            requester
                .send_request::<()>(MessageType::Ping, None)
                .await
        });

        let text = match write_rx.recv().await.unwrap() {
            tungstenite::Message::Text(t) => t.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        };
        let req: Message = serde_json::from_str(&text).unwrap();
        client
            .pending
            .complete(Message::error(&req.id, 500, "storage offline"))
            .unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, WsClientError::Remote { code: 500, .. }));
        assert_eq!(client.pending.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_and_unregisters() {
        let (client, _write_rx) = detached();
        let err = client
            .send_request::<()>(MessageType::Ping, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WsClientError::Timeout));
        assert_eq!(client.pending.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_requests_leave_nothing_registered() {
        let (client, mut write_rx) = detached();

        for _ in 0..5 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(20),
                client.send_chunk(
                    ChunkHeader {
                        id: String::new(),
                        file_id: "f1".into(),
                        chunk_index: 0,
                        total_chunks: 1,
                        checksum: String::new(),
                    },
                    b"x",
                ),
            )
            .await;
            assert!(abandoned.is_err());
            assert!(write_rx.recv().await.is_some());
        }

        assert_eq!(client.pending.len(), 0);
    }

    #[tokio::test]
    async fn closed_client_fails_fast() {
        let (client, _write_rx) = detached();
        client.cancel.cancel();
        let err = client
            .send_request::<()>(MessageType::Ping, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WsClientError::Closed));
    }
}
