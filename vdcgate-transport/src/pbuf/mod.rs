//! Binary API transport: length-prefixed protobuf envelopes mapped onto
//! structured API values.

mod codec;
pub mod field_map;
pub mod message;
pub mod schema;
pub mod wire;

pub use codec::{ProtobufCodec, DEFAULT_MAX_FRAME_SIZE};
pub use message::{DynamicMessage, FieldValue};
