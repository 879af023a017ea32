use super::schema::{FieldKind, FieldSchema, MessageSchema};
use super::wire::{self, WireType};
use crate::transport::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use indexmap::IndexMap;

/// Deepest message nesting accepted on decode. Bounds the recursion of
/// everything that walks a decoded message afterwards.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Value of one protobuf field occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Bytes),
    Message(DynamicMessage),
}

/// An owned protobuf message described by a static schema. Repeated fields
/// keep every occurrence in order.
#[derive(Debug, Clone)]
pub struct DynamicMessage {
    schema: &'static MessageSchema,
    fields: IndexMap<u32, Vec<FieldValue>>,
}

impl PartialEq for DynamicMessage {
    fn eq(&self, other: &Self) -> bool {
        self.schema.is(other.schema) && self.fields == other.fields
    }
}

impl DynamicMessage {
    pub fn new(schema: &'static MessageSchema) -> Self {
        DynamicMessage {
            schema,
            fields: IndexMap::new(),
        }
    }

    pub fn schema(&self) -> &'static MessageSchema {
        self.schema
    }

    /// Last occurrence of a field, protobuf semantics for singular fields.
    pub fn get(&self, number: u32) -> Option<&FieldValue> {
        self.fields.get(&number).and_then(|values| values.last())
    }

    pub fn get_repeated(&self, number: u32) -> &[FieldValue] {
        self.fields.get(&number).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, number: u32) -> bool {
        self.fields.get(&number).is_some_and(|v| !v.is_empty())
    }

    pub fn set(&mut self, number: u32, value: FieldValue) {
        self.fields.insert(number, vec![value]);
    }

    pub fn push(&mut self, number: u32, value: FieldValue) {
        self.fields.entry(number).or_default().push(value);
    }

    pub fn get_message(&self, number: u32) -> Option<&DynamicMessage> {
        match self.get(number) {
            Some(FieldValue::Message(message)) => Some(message),
            _ => None,
        }
    }

    pub fn get_string(&self, number: u32) -> Option<&str> {
        match self.get(number) {
            Some(FieldValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_uint(&self, number: u32) -> Option<u64> {
        match self.get(number) {
            Some(FieldValue::Uint(u)) => Some(*u),
            Some(FieldValue::Int(i)) => Some(*i as u64),
            _ => None,
        }
    }

    pub fn get_int(&self, number: u32) -> Option<i64> {
        match self.get(number) {
            Some(FieldValue::Int(i)) => Some(*i),
            Some(FieldValue::Uint(u)) => Some(*u as i64),
            _ => None,
        }
    }

    pub fn decode(schema: &'static MessageSchema, buf: Bytes) -> Result<Self, CodecError> {
        Self::decode_nested(schema, buf, 0)
    }

    fn decode_nested(
        schema: &'static MessageSchema,
        mut buf: Bytes,
        depth: usize,
    ) -> Result<Self, CodecError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(CodecError::Malformed(format!(
                "{} nested deeper than {} levels",
                schema.name, MAX_NESTING_DEPTH
            )));
        }
        let mut message = DynamicMessage::new(schema);
        while buf.has_remaining() {
            let (number, wire_type) = wire::get_key(&mut buf)?;
            match schema.field(number) {
                Some(field) => {
                    let value = decode_field(field, wire_type, &mut buf, depth)?;
                    message.push(number, value);
                }
                None => wire::skip_field(&mut buf, wire_type)?,
            }
        }
        Ok(message)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        for field in self.schema.fields {
            for value in self.get_repeated(field.number) {
                encode_field(field, value, buf);
            }
        }
    }

    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

fn expect_wire_type(
    field: &FieldSchema,
    actual: WireType,
    expected: WireType,
) -> Result<(), CodecError> {
    if actual == expected {
        Ok(())
    } else {
        Err(CodecError::Malformed(format!(
            "field {} ({}) has wire type {:?}, expected {:?}",
            field.number, field.name, actual, expected
        )))
    }
}

fn decode_field(
    field: &FieldSchema,
    wire_type: WireType,
    buf: &mut Bytes,
    depth: usize,
) -> Result<FieldValue, CodecError> {
    match field.kind {
        FieldKind::Bool => {
            expect_wire_type(field, wire_type, WireType::Varint)?;
            Ok(FieldValue::Bool(wire::get_varint(buf)? != 0))
        }
        FieldKind::Int32 | FieldKind::Enum => {
            expect_wire_type(field, wire_type, WireType::Varint)?;
            Ok(FieldValue::Int(i64::from(wire::get_varint(buf)? as i32)))
        }
        FieldKind::Int64 => {
            expect_wire_type(field, wire_type, WireType::Varint)?;
            Ok(FieldValue::Int(wire::get_varint(buf)? as i64))
        }
        FieldKind::Uint32 => {
            expect_wire_type(field, wire_type, WireType::Varint)?;
            Ok(FieldValue::Uint(u64::from(wire::get_varint(buf)? as u32)))
        }
        FieldKind::Uint64 => {
            expect_wire_type(field, wire_type, WireType::Varint)?;
            Ok(FieldValue::Uint(wire::get_varint(buf)?))
        }
        FieldKind::Double => {
            expect_wire_type(field, wire_type, WireType::Fixed64)?;
            Ok(FieldValue::Double(f64::from_bits(wire::get_fixed64(buf)?)))
        }
        FieldKind::String => {
            expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
            let data = wire::get_length_delimited(buf)?;
            let text = String::from_utf8(data.to_vec()).map_err(|_| {
                CodecError::Malformed(format!("field {} is not valid UTF-8", field.name))
            })?;
            Ok(FieldValue::String(text))
        }
        FieldKind::Bytes => {
            expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
            Ok(FieldValue::Bytes(wire::get_length_delimited(buf)?))
        }
        FieldKind::Message(schema) => {
            expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
            let data = wire::get_length_delimited(buf)?;
            Ok(FieldValue::Message(DynamicMessage::decode_nested(
                schema,
                data,
                depth + 1,
            )?))
        }
    }
}

fn encode_field(field: &FieldSchema, value: &FieldValue, buf: &mut BytesMut) {
    match (field.kind, value) {
        (FieldKind::Double, v) => {
            wire::put_key(buf, field.number, WireType::Fixed64);
            buf.put_u64_le(as_double(v).to_bits());
        }
        (FieldKind::String | FieldKind::Bytes, FieldValue::String(s)) => {
            wire::put_key(buf, field.number, WireType::LengthDelimited);
            wire::put_length_delimited(buf, s.as_bytes());
        }
        (FieldKind::String | FieldKind::Bytes, FieldValue::Bytes(b)) => {
            wire::put_key(buf, field.number, WireType::LengthDelimited);
            wire::put_length_delimited(buf, b);
        }
        (FieldKind::Message(_), FieldValue::Message(message)) => {
            let mut nested = BytesMut::new();
            message.encode(&mut nested);
            wire::put_key(buf, field.number, WireType::LengthDelimited);
            wire::put_length_delimited(buf, &nested);
        }
        (FieldKind::Bool, v) => {
            wire::put_key(buf, field.number, WireType::Varint);
            wire::put_varint(buf, u64::from(as_int(v) != 0));
        }
        (FieldKind::Int32 | FieldKind::Enum, v) => {
            wire::put_key(buf, field.number, WireType::Varint);
            // negative int32 values are sign extended to 64 bits
            wire::put_varint(buf, i64::from(as_int(v) as i32) as u64);
        }
        (FieldKind::Int64, v) => {
            wire::put_key(buf, field.number, WireType::Varint);
            wire::put_varint(buf, as_int(v) as u64);
        }
        (FieldKind::Uint32, v) => {
            wire::put_key(buf, field.number, WireType::Varint);
            wire::put_varint(buf, u64::from(as_int(v) as u32));
        }
        (FieldKind::Uint64, v) => {
            wire::put_key(buf, field.number, WireType::Varint);
            wire::put_varint(buf, as_int(v) as u64);
        }
        // a value that does not fit the declared kind is dropped
        (_, _) => {
            tracing::warn!(field = field.name, "Value does not match field kind, not encoded");
        }
    }
}

fn as_int(value: &FieldValue) -> i64 {
    match value {
        FieldValue::Bool(b) => i64::from(*b),
        FieldValue::Int(i) => *i,
        FieldValue::Uint(u) => *u as i64,
        FieldValue::Double(d) => *d as i64,
        _ => 0,
    }
}

fn as_double(value: &FieldValue) -> f64 {
    match value {
        FieldValue::Double(d) => *d,
        other => as_int(other) as f64,
    }
}
