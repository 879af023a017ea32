use super::field_map::{message_to_value, value_to_message};
use super::message::{DynamicMessage, FieldValue};
use super::schema::{
    message_type_by_tag, outgoing_type, typed_response, MessageKind, ENVELOPE,
    ENVELOPE_GENERIC_RESPONSE, ENVELOPE_MESSAGE_ID, ENVELOPE_TYPE, GENERIC_RESPONSE,
    GENERIC_RESPONSE_TAG,
};
use crate::transport::{ApiCodec, ApiMessage, ApiRole, CodecError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};
use vdcgate_core::{
    ApiError, ApiValue, ApiValueType, ErrorCode, ErrorType, MessageId, ResultCode,
    StructApiValue, ValueEncoding,
};

/// Largest frame body accepted or produced by default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

const HEADER_LEN: usize = 2;

const GENERIC_CODE: u32 = 1;
const GENERIC_DESCRIPTION: u32 = 2;
const GENERIC_ERROR_TYPE: u32 = 3;
const GENERIC_USER_MESSAGE: u32 = 4;

/// Codec for the binary API: a 2-byte big-endian length followed by one
/// protobuf `Message` envelope.
pub struct ProtobufCodec {
    role: ApiRole,
    max_frame_size: usize,
}

impl ProtobufCodec {
    pub fn new(role: ApiRole) -> Self {
        Self {
            role,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(role: ApiRole, max_frame_size: usize) -> Self {
        Self {
            role,
            max_frame_size: max_frame_size.min(u16::MAX as usize),
        }
    }

    pub fn role(&self) -> ApiRole {
        self.role
    }

    fn factory() -> StructApiValue {
        StructApiValue::new(ApiValueType::Null)
    }

    fn decode_envelope(&self, body: Bytes) -> Result<ApiMessage, CodecError> {
        let envelope = DynamicMessage::decode(&ENVELOPE, body)?;
        let tag = envelope.get_uint(ENVELOPE_TYPE).unwrap_or(0) as u32;
        let raw_id = envelope.get_uint(ENVELOPE_MESSAGE_ID).unwrap_or(0) as u32;
        let id = MessageId::new(raw_id);
        let factory = Self::factory();

        let Some(message_type) = message_type_by_tag(tag) else {
            let method = format!("unknownMethod_{}", tag);
            let params = factory.new_value(ApiValueType::Object);
            return Ok(if id.is_none() {
                ApiMessage::Notification { method, params }
            } else {
                ApiMessage::Call { id, method, params }
            });
        };

        if message_type.tag == GENERIC_RESPONSE_TAG {
            return Ok(decode_generic_response(
                id,
                envelope.get_message(ENVELOPE_GENERIC_RESPONSE),
            ));
        }

        let params = match envelope.get_message(message_type.slot) {
            Some(payload) => message_to_value(payload, &factory),
            None => {
                let error = ApiError::new(
                    ErrorCode::MissingSubmessage,
                    format!("missing payload for {}", message_type.payload.name),
                );
                return Ok(ApiMessage::Invalid {
                    id: (!id.is_none()).then_some(id),
                    error,
                });
            }
        };
        let method = message_type.method.to_string();

        Ok(match message_type.kind {
            MessageKind::Request => ApiMessage::Call { id, method, params },
            MessageKind::Notification => ApiMessage::Notification { method, params },
            MessageKind::Response => {
                // getProperty answers carry the element list, not the whole payload
                let result = if method == "getProperty" {
                    params
                        .get("properties")
                        .unwrap_or_else(|| factory.new_value(ApiValueType::Object))
                } else {
                    params
                };
                ApiMessage::Result { id, method, result }
            }
        })
    }

    fn encode_envelope(&self, item: ApiMessage) -> Result<DynamicMessage, CodecError> {
        let mut envelope = DynamicMessage::new(&ENVELOPE);
        match item {
            ApiMessage::Call { id, method, params } => {
                let message_type = outgoing_type(&method, self.role)
                    .filter(|t| t.kind == MessageKind::Request)
                    .ok_or(CodecError::UnknownMethod(method))?;
                envelope.set(ENVELOPE_TYPE, FieldValue::Uint(u64::from(message_type.tag)));
                envelope.set(ENVELOPE_MESSAGE_ID, FieldValue::Uint(u64::from(id.as_u32())));
                let payload = value_to_message(params.as_ref(), message_type.payload);
                envelope.set(message_type.slot, FieldValue::Message(payload));
            }
            ApiMessage::Notification { method, params } => {
                let message_type = outgoing_type(&method, self.role)
                    .ok_or(CodecError::UnknownMethod(method))?;
                envelope.set(ENVELOPE_TYPE, FieldValue::Uint(u64::from(message_type.tag)));
                let payload = value_to_message(params.as_ref(), message_type.payload);
                envelope.set(message_type.slot, FieldValue::Message(payload));
            }
            ApiMessage::Result { id, method, result } => {
                envelope.set(ENVELOPE_MESSAGE_ID, FieldValue::Uint(u64::from(id.as_u32())));
                match typed_response(&method, self.role) {
                    Some(message_type) => {
                        envelope.set(ENVELOPE_TYPE, FieldValue::Uint(u64::from(message_type.tag)));
                        let payload = if method == "getProperty" {
                            let mut wrapper = result.new_value(ApiValueType::Object);
                            wrapper.add("properties", result);
                            value_to_message(wrapper.as_ref(), message_type.payload)
                        } else {
                            value_to_message(result.as_ref(), message_type.payload)
                        };
                        envelope.set(message_type.slot, FieldValue::Message(payload));
                    }
                    None => {
                        if carries_data(result.as_ref()) {
                            warn!(
                                method = %method,
                                result = %result.description(),
                                "Unsent result, {} has no typed response",
                                method
                            );
                        }
                        set_generic_response(&mut envelope, None);
                    }
                }
            }
            ApiMessage::Error { id, error } => {
                envelope.set(ENVELOPE_MESSAGE_ID, FieldValue::Uint(u64::from(id.as_u32())));
                set_generic_response(&mut envelope, Some(&error));
            }
            ApiMessage::Invalid { .. } => {
                return Err(CodecError::MessageError(
                    "invalid messages cannot be sent".into(),
                ))
            }
        }
        Ok(envelope)
    }
}

/// Whether a result has content a generic response would lose.
fn carries_data(result: &dyn ApiValue) -> bool {
    let empty_object = result.is_type(ApiValueType::Object) && result.num_keys() == 0;
    !result.is_null() && !empty_object
}

fn set_generic_response(envelope: &mut DynamicMessage, error: Option<&ApiError>) {
    envelope.set(ENVELOPE_TYPE, FieldValue::Uint(u64::from(GENERIC_RESPONSE_TAG)));
    let mut response = DynamicMessage::new(&GENERIC_RESPONSE);
    match error {
        None => {
            response.set(GENERIC_CODE, FieldValue::Int(ResultCode::Ok.as_u32() as i64));
        }
        Some(error) => {
            response.set(
                GENERIC_CODE,
                FieldValue::Int(error.result_code().as_u32() as i64),
            );
            response.set(GENERIC_DESCRIPTION, FieldValue::String(error.message.clone()));
            response.set(
                GENERIC_ERROR_TYPE,
                FieldValue::Int(error.error_type.as_u32() as i64),
            );
            if let Some(user_message) = &error.user_message {
                response.set(GENERIC_USER_MESSAGE, FieldValue::String(user_message.clone()));
            }
        }
    }
    envelope.set(ENVELOPE_GENERIC_RESPONSE, FieldValue::Message(response));
}

fn decode_generic_response(id: MessageId, response: Option<&DynamicMessage>) -> ApiMessage {
    let Some(response) = response else {
        // still an answer to `id`, so the waiting caller gets resolved
        return ApiMessage::Error {
            id,
            error: ApiError::new(ErrorCode::MissingSubmessage, "generic response without payload"),
        };
    };
    let code = response.get_int(GENERIC_CODE).unwrap_or(0) as u32;
    match ResultCode::from_u32(code) {
        Some(ResultCode::Ok) => ApiMessage::Result {
            id,
            method: String::new(),
            result: Box::new(StructApiValue::new(ApiValueType::Null)),
        },
        result_code => {
            let error_code = result_code
                .map(ResultCode::to_error_code)
                .unwrap_or(ErrorCode::Internal);
            let mut error = ApiError::new(
                error_code,
                response.get_string(GENERIC_DESCRIPTION).unwrap_or_default(),
            )
            .with_type(ErrorType::from_u32(
                response.get_int(GENERIC_ERROR_TYPE).unwrap_or(0) as u32,
            ));
            if let Some(user_message) = response.get_string(GENERIC_USER_MESSAGE) {
                error = error.with_user_message(user_message);
            }
            ApiMessage::Error { id, error }
        }
    }
}

impl Decoder for ProtobufCodec {
    type Item = ApiMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let frame_len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if frame_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(frame_len));
        }

        if src.len() < HEADER_LEN + frame_len {
            src.reserve(HEADER_LEN + frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(frame_len).freeze();
        let message = self.decode_envelope(body)?;
        debug!(len = frame_len, message = %message.summary(), "Decoded frame");
        Ok(Some(message))
    }
}

impl Encoder<ApiMessage> for ProtobufCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ApiMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let envelope = self.encode_envelope(item)?;
        let body = envelope.encode_to_bytes();
        if body.len() > self.max_frame_size {
            return Err(CodecError::OutboundTooLarge(body.len()));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u16(body.len() as u16);
        dst.put_slice(&body);
        Ok(())
    }
}

impl ApiCodec for ProtobufCodec {
    fn encoding(&self) -> ValueEncoding {
        ValueEncoding::Struct
    }
}
