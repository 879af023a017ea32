use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use vdcgate_core::{ApiError, ApiValue, ApiValuePtr, MessageId, ValueEncoding};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Outbound message too large: {0} bytes")]
    OutboundTooLarge(usize),

    #[error("Line too long: {0} bytes")]
    LineTooLong(usize),

    #[error("Malformed protobuf: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    JsonError(String),

    #[error("Message error: {0}")]
    MessageError(String),

    #[error("Unknown method '{0}' for this role")]
    UnknownMethod(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl CodecError {
    /// Framing, body decoding and I/O errors leave the stream unusable;
    /// everything else concerns one message only.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::FrameTooLarge(_)
                | CodecError::LineTooLong(_)
                | CodecError::Malformed(_)
                | CodecError::IoError(_)
        )
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownMethod(method) => ApiError::method_unknown(&method),
            other => ApiError::internal(other.to_string()),
        }
    }
}

/// Which end of the API this side plays. Decides which envelope tags are
/// used for outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiRole {
    /// Device side, answers the controller.
    Vdc,
    /// Controller side.
    Vdsm,
}

impl fmt::Display for ApiRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiRole::Vdc => write!(f, "vdc"),
            ApiRole::Vdsm => write!(f, "vdsm"),
        }
    }
}

impl FromStr for ApiRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vdc" => Ok(ApiRole::Vdc),
            "vdsm" => Ok(ApiRole::Vdsm),
            other => Err(format!("unknown API role '{}'", other)),
        }
    }
}

/// One decoded or to-be-encoded API message.
#[derive(Debug, Clone)]
pub enum ApiMessage {
    /// Method call expecting exactly one response.
    Call {
        id: MessageId,
        method: String,
        params: ApiValuePtr,
    },
    Notification {
        method: String,
        params: ApiValuePtr,
    },
    /// Successful response. `method` names the call being answered so
    /// transports with typed responses can pick the right shape; it may be
    /// empty on inbound responses.
    Result {
        id: MessageId,
        method: String,
        result: ApiValuePtr,
    },
    Error {
        id: MessageId,
        error: ApiError,
    },
    /// Inbound message that could not be understood. With an id, the peer
    /// gets `error` as the answer.
    Invalid {
        id: Option<MessageId>,
        error: ApiError,
    },
}

impl ApiMessage {
    pub fn id(&self) -> Option<MessageId> {
        match self {
            ApiMessage::Call { id, .. }
            | ApiMessage::Result { id, .. }
            | ApiMessage::Error { id, .. } => Some(*id),
            ApiMessage::Notification { .. } => None,
            ApiMessage::Invalid { id, .. } => *id,
        }
    }

    /// Short label for logs.
    pub fn summary(&self) -> String {
        match self {
            ApiMessage::Call { id, method, params } => {
                format!("call {} #{}: {}", method, id.as_u32(), params.description())
            }
            ApiMessage::Notification { method, params } => {
                format!("notification {}: {}", method, params.description())
            }
            ApiMessage::Result { id, result, .. } => {
                format!("result #{}: {}", id.as_u32(), result.description())
            }
            ApiMessage::Error { id, error } => format!("error #{}: {}", id.as_u32(), error),
            ApiMessage::Invalid { id, error } => format!("invalid {:?}: {}", id, error),
        }
    }
}

/// A framing codec that turns a byte stream into [`ApiMessage`]s.
pub trait ApiCodec:
    Decoder<Item = ApiMessage, Error = CodecError>
    + Encoder<ApiMessage, Error = CodecError>
    + Send
    + Unpin
    + 'static
{
    /// Encoding of the values this codec produces and expects.
    fn encoding(&self) -> ValueEncoding;
}
