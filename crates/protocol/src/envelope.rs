//! JSON envelope carried by every WebSocket text frame.
//!
//! Requests and responses share one shape. A response reuses the id of the
//! request it answers, whether that request arrived as a text envelope or
//! as the header of a binary chunk frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::{MessageType, is_retryable_code};

/// Failure details attached to an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsError {
    pub code: i32,
    pub message: String,
}

impl WsError {
    /// Whether resending the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        is_retryable_code(self.code)
    }
}

/// Reasons an envelope does not yield the payload a caller asked for.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("assembler error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("expected {expected:?}, got {actual:?}")]
    UnexpectedType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("{0:?} without payload")]
    MissingPayload(MessageType),

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// One text frame. The payload stays raw until the receiver knows its type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

impl Message {
    /// Message without a payload, such as a ping and its pong.
    pub fn bare(id: impl Into<String>, msg_type: MessageType) -> Self {
        Self {
            id: id.into(),
            msg_type,
            payload: None,
            error: None,
        }
    }

    pub fn with_payload<T: Serialize + ?Sized>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: Some(serde_json::value::to_raw_value(payload)?),
            ..Self::bare(id, msg_type)
        })
    }

    /// Error reply to the request identified by `id`.
    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            error: Some(WsError {
                code,
                message: message.into(),
            }),
            ..Self::bare(id, MessageType::Error)
        }
    }

    /// Decodes the payload. An absent payload is an error.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        let raw = self
            .payload
            .as_ref()
            .ok_or_else(|| EnvelopeError::MissingPayload(self.msg_type.clone()))?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// Unwraps a response: error replies become [`EnvelopeError::Remote`],
    /// and anything other than `expected` is rejected before decoding.
    pub fn into_payload<T: DeserializeOwned>(
        mut self,
        expected: MessageType,
    ) -> Result<T, EnvelopeError> {
        if let Some(err) = self.error.take() {
            return Err(EnvelopeError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        if self.msg_type != expected {
            return Err(EnvelopeError::UnexpectedType {
                expected,
                actual: self.msg_type,
            });
        }
        self.payload()
    }
}
