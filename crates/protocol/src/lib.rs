//! Wire protocol shared by the uploader and the assembler.
//!
//! JSON envelopes travel as WebSocket text frames; chunk payloads travel
//! as binary frames (see [`binary`]).

pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use binary::{ChunkFrame, ChunkHeader, FrameError, encode_chunk_frame, parse_chunk_frame};
pub use constants::MessageType;
pub use envelope::{EnvelopeError, Message, WsError};
pub use types::{AssembledFile, FileDescriptor, SessionStatus, total_chunks};
