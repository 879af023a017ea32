//! Transport-agnostic API connections and the two wire formats spoken by
//! vdcgate: length-prefixed protobuf envelopes and newline-delimited
//! JSON-RPC.

pub mod connection;
pub mod json_codec;
pub mod pbuf;
pub mod pending;
pub mod transport;

pub use connection::{spawn_connection, ApiConnectionHandle, ApiRequest, ApiRequestHandler};
pub use json_codec::JsonRpcCodec;
pub use pbuf::ProtobufCodec;
pub use pending::{PendingAnswers, ResponseHandler};
pub use transport::{ApiCodec, ApiMessage, ApiRole, CodecError, TransportError};
