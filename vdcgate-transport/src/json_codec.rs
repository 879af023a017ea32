//! Newline-delimited JSON-RPC 2.0 codec.

use crate::transport::{ApiCodec, ApiMessage, CodecError};
use bytes::{Buf, BufMut, BytesMut};
use serde_json::{json, Map, Value};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;
use vdcgate_core::{
    ApiError, ApiValue, ErrorCode, ErrorType, JsonApiValue, MessageId, ValueEncoding,
};

pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024;

pub struct JsonRpcCodec {
    max_line_length: usize,
}

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_id(id: &Value) -> Option<MessageId> {
    let raw = match id {
        Value::String(s) => s.trim().parse::<u32>().ok()?,
        Value::Number(n) => u32::try_from(n.as_u64()?).ok()?,
        _ => return None,
    };
    // 0 is the reserved none id
    Some(MessageId::new(raw)).filter(|id| !id.is_none())
}

fn parse_error(error: &Value) -> ApiError {
    let code = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .map(ErrorCode::from_u16)
        .unwrap_or(ErrorCode::Internal);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut api_error = ApiError::new(code, message);
    if let Some(data) = error.get("data") {
        if let Some(error_type) = data.get("errorType").and_then(Value::as_u64) {
            api_error = api_error.with_type(ErrorType::from_u32(error_type as u32));
        }
        if let Some(user_message) = data.get("userMessage").and_then(Value::as_str) {
            api_error = api_error.with_user_message(user_message);
        }
    }
    api_error
}

fn decode_line(line: &[u8]) -> ApiMessage {
    let value: Value = match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(err) => {
            return ApiMessage::Invalid {
                id: None,
                error: ApiError::bad_request(format!("JSON error: {}", err)),
            }
        }
    };
    let Value::Object(mut object) = value else {
        return ApiMessage::Invalid {
            id: None,
            error: ApiError::bad_request("JSON-RPC message must be an object"),
        };
    };

    let raw_id = object.remove("id").filter(|id| !id.is_null());
    let id = raw_id.as_ref().map(parse_id);
    if let Some(None) = id {
        // a request is still answered, with `"id": null`
        let is_request = object.contains_key("method");
        return ApiMessage::Invalid {
            id: is_request.then_some(MessageId::NONE),
            error: ApiError::bad_request("JSON-RPC id must be a positive 32 bit number"),
        };
    }
    let id = id.flatten();

    if let Some(method) = object.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        let params = JsonApiValue::from_json(object.remove("params").unwrap_or(Value::Null));
        return match id {
            Some(id) => ApiMessage::Call { id, method, params },
            None => ApiMessage::Notification { method, params },
        };
    }

    match (id, object.remove("result"), object.get("error")) {
        (Some(id), Some(result), _) => ApiMessage::Result {
            id,
            method: String::new(),
            result: JsonApiValue::from_json(result),
        },
        (Some(id), None, Some(error)) => ApiMessage::Error {
            id,
            error: parse_error(error),
        },
        (id, _, _) => ApiMessage::Invalid {
            id,
            error: ApiError::bad_request("JSON-RPC message has neither method nor result"),
        },
    }
}

fn encode_error(error: &ApiError) -> Value {
    let mut data = Map::new();
    data.insert("errorType".into(), json!(error.error_type.as_u32()));
    if let Some(user_message) = &error.user_message {
        data.insert("userMessage".into(), json!(user_message));
    }
    json!({
        "code": error.code.as_u16(),
        "message": error.message,
        "data": data,
    })
}

/// The none id stands for an id the peer sent but that could not be read.
fn encode_id(id: MessageId) -> Value {
    if id.is_none() {
        Value::Null
    } else {
        Value::String(id.as_u32().to_string())
    }
}

fn encode_message(item: ApiMessage) -> Result<Value, CodecError> {
    Ok(match item {
        ApiMessage::Call { id, method, params } => json!({
            "jsonrpc": "2.0",
            "id": id.as_u32().to_string(),
            "method": method,
            "params": params.to_json(),
        }),
        ApiMessage::Notification { method, params } => json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.to_json(),
        }),
        ApiMessage::Result { id, result, .. } => json!({
            "jsonrpc": "2.0",
            "id": encode_id(id),
            "result": result.to_json(),
        }),
        ApiMessage::Error { id, error } => json!({
            "jsonrpc": "2.0",
            "id": encode_id(id),
            "error": encode_error(&error),
        }),
        ApiMessage::Invalid { .. } => {
            return Err(CodecError::MessageError(
                "invalid messages cannot be sent".into(),
            ))
        }
    })
}

impl Decoder for JsonRpcCodec {
    type Item = ApiMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                if src.len() > self.max_line_length {
                    return Err(CodecError::LineTooLong(src.len()));
                }
                return Ok(None);
            };
            if pos > self.max_line_length {
                return Err(CodecError::LineTooLong(pos));
            }

            let line = src.split_to(pos);
            src.advance(1);
            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let message = decode_line(line);
            debug!(message = %message.summary(), "Decoded JSON-RPC line");
            return Ok(Some(message));
        }
    }
}

impl Encoder<ApiMessage> for JsonRpcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ApiMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let value = encode_message(item)?;
        let bytes = serde_json::to_vec(&value).map_err(|e| CodecError::JsonError(e.to_string()))?;
        if bytes.len() > self.max_line_length {
            return Err(CodecError::OutboundTooLarge(bytes.len()));
        }

        dst.reserve(bytes.len() + 1);
        dst.put_slice(&bytes);
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl ApiCodec for JsonRpcCodec {
    fn encoding(&self) -> ValueEncoding {
        ValueEncoding::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(codec: &mut JsonRpcCodec, text: &str) -> Option<ApiMessage> {
        let mut buf = BytesMut::from(text);
        codec.decode(&mut buf).unwrap()
    }

    #[test]
    fn test_call_with_string_id() {
        let mut codec = JsonRpcCodec::new();
        let message = decode_str(
            &mut codec,
            "{\"jsonrpc\":\"2.0\",\"id\":\"12\",\"method\":\"getProperty\",\"params\":{\"query\":{\"name\":null}}}\n",
        );
        match message {
            Some(ApiMessage::Call { id, method, params }) => {
                assert_eq!(id.as_u32(), 12);
                assert_eq!(method, "getProperty");
                assert_eq!(params.to_json(), json!({"query": {"name": null}}));
                assert_eq!(params.encoding(), ValueEncoding::Json);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_notification_and_blank_lines() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from("\r\n\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\r\n");
        match codec.decode(&mut buf).unwrap() {
            Some(ApiMessage::Notification { method, params }) => {
                assert_eq!(method, "ping");
                assert!(params.is_null());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_waits() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"method\":");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\"ping\"}\n");
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_malformed_json_is_invalid_not_fatal() {
        let mut codec = JsonRpcCodec::new();
        assert!(matches!(
            decode_str(&mut codec, "{not json\n"),
            Some(ApiMessage::Invalid { id: None, .. })
        ));
    }

    #[test]
    fn test_overlong_line_is_fatal() {
        let mut codec = JsonRpcCodec::with_max_line_length(8);
        let mut buf = BytesMut::from("0123456789abcdef");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_round_trip() {
        let mut codec = JsonRpcCodec::new();
        let error = ApiError::forbidden("read-only").with_user_message("locked");
        let mut buf = BytesMut::new();
        codec
            .encode(
                ApiMessage::Error {
                    id: MessageId::new(3),
                    error: error.clone(),
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        match codec.decode(&mut buf).unwrap() {
            Some(ApiMessage::Error { id, error: decoded }) => {
                assert_eq!(id.as_u32(), 3);
                assert_eq!(decoded, error);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_result_encodes_string_id() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                ApiMessage::Result {
                    id: MessageId::new(44),
                    method: "hello".into(),
                    result: JsonApiValue::from_json(json!({"dSUID": "x"})),
                },
                &mut buf,
            )
            .unwrap();
        let line: Value = serde_json::from_slice(&buf[..buf.len() - 1]).unwrap();
        assert_eq!(line["id"], json!("44"));
        assert_eq!(line["result"]["dSUID"], json!("x"));
    }

    #[test]
    fn test_unreadable_id_is_answered_with_null_id() {
        let mut codec = JsonRpcCodec::new();
        let error = match decode_str(
            &mut codec,
            "{\"jsonrpc\":\"2.0\",\"id\":-4,\"method\":\"hello\"}\n",
        ) {
            Some(ApiMessage::Invalid { id: Some(id), error }) => {
                assert!(id.is_none());
                error
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(error.code, ErrorCode::BadRequest);

        let mut buf = BytesMut::new();
        codec
            .encode(
                ApiMessage::Error {
                    id: MessageId::NONE,
                    error,
                },
                &mut buf,
            )
            .unwrap();
        let line: Value = serde_json::from_slice(&buf[..buf.len() - 1]).unwrap();
        assert_eq!(line["id"], Value::Null);
        assert_eq!(line["error"]["code"], json!(400));

        // a response with an unreadable id has nobody to answer
        assert!(matches!(
            decode_str(&mut codec, "{\"jsonrpc\":\"2.0\",\"id\":0,\"result\":1}\n"),
            Some(ApiMessage::Invalid { id: None, .. })
        ));
    }
}
