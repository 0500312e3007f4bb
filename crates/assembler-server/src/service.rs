use std::sync::Arc;

use chunkferry_assembler::{Assembler, AssemblerError};
use chunkferry_protocol::constants::{MessageType, WS_ERR_CODE_BAD_REQUEST};
use chunkferry_protocol::messages::{
    CompleteUploadRequest, RegisterMetadataRequest, UploadStatusRequest,
};
use chunkferry_protocol::{ChunkHeader, Message};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};

/// [`Handler`] that serves the upload protocol from an [`Assembler`].
#[derive(Clone)]
pub struct AssemblerService {
    assembler: Arc<Assembler>,
}

impl AssemblerService {
    pub fn new(assembler: Arc<Assembler>) -> Self {
        Self { assembler }
    }

    pub fn assembler(&self) -> &Arc<Assembler> {
        &self.assembler
    }
}

fn parse_or_reject<T: DeserializeOwned>(sender: &Sender, msg: &Message) -> Option<T> {
    match msg.payload::<T>() {
        Ok(p) => Some(p),
        Err(e) => {
            let _ = sender.send_error(&msg.id, WS_ERR_CODE_BAD_REQUEST, &e.to_string());
            None
        }
    }
}

/// Answers request `id` with `msg_type` on success or an error reply.
fn respond<T: Serialize>(
    sender: &Sender,
    id: &str,
    msg_type: MessageType,
    result: Result<T, AssemblerError>,
) {
    match result {
        Ok(payload) => match Message::with_payload(id, msg_type, &payload) {
            Ok(reply) => {
                let _ = sender.send_msg(reply);
            }
            Err(e) => {
                tracing::error!("failed to encode reply: {e}");
            }
        },
        Err(e) => {
            let _ = sender.send_error(id, e.code(), &e.to_string());
        }
    }
}

impl Handler for AssemblerService {
    fn on_register_metadata(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_or_reject::<RegisterMetadataRequest>(&sender, &msg) else {
                return;
            };
            let result = self.assembler.register_metadata(req.file).await;
            respond(&sender, &msg.id, MessageType::RegisterMetadataResponse, result);
        })
    }

    fn on_complete_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_or_reject::<CompleteUploadRequest>(&sender, &msg) else {
                return;
            };
            let result = self.assembler.finalize(&req.file_id).await;
            respond(&sender, &msg.id, MessageType::CompleteUploadResponse, result);
        })
    }

    fn on_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = parse_or_reject::<UploadStatusRequest>(&sender, &msg) else {
                return;
            };
            let result = self.assembler.status(&req.file_id).await;
            respond(&sender, &msg.id, MessageType::UploadStatusResponse, result);
        })
    }

    fn on_chunk(&self, sender: Sender, header: ChunkHeader, data: Vec<u8>) -> HandlerFuture<'_> {
        Box::pin(async move {
            let result = self
                .assembler
                .store_chunk(
                    &header.file_id,
                    header.chunk_index,
                    header.total_chunks,
                    data,
                    &header.checksum,
                )
                .await;
            if let Err(e) = &result {
                tracing::warn!(
                    file_id = %header.file_id,
                    index = header.chunk_index,
                    "chunk rejected: {e}"
                );
            }
            respond(&sender, &header.id, MessageType::UploadChunkResponse, result);
        })
    }
}
