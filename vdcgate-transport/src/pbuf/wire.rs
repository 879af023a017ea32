//! Protobuf wire primitives over `bytes`.

use crate::transport::CodecError;
use bytes::{Buf, BufMut, Bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(CodecError::Malformed(format!(
                "unsupported wire type {}",
                other
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }
}

pub fn put_varint(buf: &mut impl BufMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn get_varint(buf: &mut impl Buf) -> Result<u64, CodecError> {
    let mut value = 0u64;
    for shift in (0..70).step_by(7) {
        if !buf.has_remaining() {
            return Err(CodecError::Malformed("truncated varint".into()));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::Malformed("varint longer than 10 bytes".into()))
}

pub fn put_key(buf: &mut impl BufMut, number: u32, wire_type: WireType) {
    put_varint(buf, (u64::from(number) << 3) | u64::from(wire_type.as_u8()));
}

pub fn get_key(buf: &mut impl Buf) -> Result<(u32, WireType), CodecError> {
    let key = get_varint(buf)?;
    let number = u32::try_from(key >> 3)
        .map_err(|_| CodecError::Malformed(format!("field number out of range in key {}", key)))?;
    if number == 0 {
        return Err(CodecError::Malformed("field number 0".into()));
    }
    Ok((number, WireType::from_u8((key & 0x7) as u8)?))
}

pub fn put_length_delimited(buf: &mut impl BufMut, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

pub fn get_length_delimited(buf: &mut Bytes) -> Result<Bytes, CodecError> {
    let len = get_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Malformed(format!(
            "length {} exceeds remaining {} bytes",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

pub fn get_fixed64(buf: &mut impl Buf) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::Malformed("truncated 64-bit field".into()));
    }
    Ok(buf.get_u64_le())
}

/// Skip over a field of `wire_type` whose key has already been read.
pub fn skip_field(buf: &mut Bytes, wire_type: WireType) -> Result<(), CodecError> {
    match wire_type {
        WireType::Varint => {
            get_varint(buf)?;
        }
        WireType::Fixed64 => {
            get_fixed64(buf)?;
        }
        WireType::LengthDelimited => {
            get_length_delimited(buf)?;
        }
        WireType::Fixed32 => {
            if buf.remaining() < 4 {
                return Err(CodecError::Malformed("truncated 32-bit field".into()));
            }
            buf.advance(4);
        }
    }
    Ok(())
}
