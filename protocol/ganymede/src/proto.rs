//! Minimal protobuf encoding/decoding for the Ganymede device messages.
//!
//! This implements just enough of the protobuf wire format to encode and
//! decode the `ganymede.v2` messages without requiring prost or other
//! heavy deps. Decoders skip fields they do not know.

use grpc::DecodeError;

/// Wire type for varint (int32, int64, uint32, uint64, bool, enum).
pub const WIRE_TYPE_VARINT: u8 = 0;
/// Wire type for 64-bit fixed values.
pub const WIRE_TYPE_FIXED64: u8 = 1;
/// Wire type for length-delimited (string, bytes, embedded messages).
pub const WIRE_TYPE_LEN: u8 = 2;
/// Wire type for 32-bit fixed values (fixed32, float).
pub const WIRE_TYPE_FIXED32: u8 = 5;

/// Encode a varint.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Number of bytes `encode_varint` produces for `value`.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode a varint from a buffer.
pub fn decode_varint(buf: &mut &[u8]) -> Result<u64, DecodeError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        let Some((&byte, rest)) = buf.split_first() else {
            return Err(DecodeError::Truncated);
        };
        *buf = rest;

        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(DecodeError::VarintOverflow);
        }
    }
}

/// Encode a field tag.
pub fn encode_tag(field_number: u32, wire_type: u8, buf: &mut Vec<u8>) {
    encode_varint(((field_number as u64) << 3) | (wire_type as u64), buf);
}

pub fn tag_len(field_number: u32) -> usize {
    varint_len((field_number as u64) << 3)
}

/// Decode a field tag, returning (field_number, wire_type).
pub fn decode_tag(buf: &mut &[u8]) -> Result<(u32, u8), DecodeError> {
    let tag = decode_varint(buf)?;
    let field_number = (tag >> 3) as u32;
    let wire_type = (tag & 0x07) as u8;
    if field_number == 0 {
        return Err(DecodeError::Invalid("field number 0"));
    }
    Ok((field_number, wire_type))
}

/// Encode a bytes field.
pub fn encode_bytes(field_number: u32, data: &[u8], buf: &mut Vec<u8>) {
    encode_tag(field_number, WIRE_TYPE_LEN, buf);
    encode_varint(data.len() as u64, buf);
    buf.extend_from_slice(data);
}

pub fn bytes_len(field_number: u32, len: usize) -> usize {
    tag_len(field_number) + varint_len(len as u64) + len
}

/// Encode a string field (same as bytes in protobuf).
pub fn encode_string(field_number: u32, s: &str, buf: &mut Vec<u8>) {
    encode_bytes(field_number, s.as_bytes(), buf);
}

/// Encode a uint32/uint64 field.
pub fn encode_uint64(field_number: u32, value: u64, buf: &mut Vec<u8>) {
    encode_tag(field_number, WIRE_TYPE_VARINT, buf);
    encode_varint(value, buf);
}

pub fn uint64_len(field_number: u32, value: u64) -> usize {
    tag_len(field_number) + varint_len(value)
}

/// Encode an int32/int64 field. Negative values take ten bytes, as the
/// protobuf encoding of `int32` sign-extends to 64 bits.
pub fn encode_int64(field_number: u32, value: i64, buf: &mut Vec<u8>) {
    encode_uint64(field_number, value as u64, buf);
}

pub fn int64_len(field_number: u32, value: i64) -> usize {
    uint64_len(field_number, value as u64)
}

pub fn encode_bool(field_number: u32, value: bool, buf: &mut Vec<u8>) {
    encode_uint64(field_number, u64::from(value), buf);
}

/// Encode a float field.
pub fn encode_float(field_number: u32, value: f32, buf: &mut Vec<u8>) {
    encode_tag(field_number, WIRE_TYPE_FIXED32, buf);
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn float_len(field_number: u32) -> usize {
    tag_len(field_number) + 4
}

/// Encode an embedded message field.
pub fn encode_message<M: grpc::Message>(field_number: u32, message: &M, buf: &mut Vec<u8>) {
    encode_tag(field_number, WIRE_TYPE_LEN, buf);
    encode_varint(message.encoded_len() as u64, buf);
    message.encode(buf);
}

pub fn message_len<M: grpc::Message>(field_number: u32, message: &M) -> usize {
    bytes_len(field_number, message.encoded_len())
}

/// Decode a length-delimited field, returning the bytes.
pub fn decode_length_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let len = usize::try_from(decode_varint(buf)?).map_err(|_| DecodeError::Truncated)?;
    if buf.len() < len {
        return Err(DecodeError::Truncated);
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Ok(data)
}

pub fn decode_string(field_number: u32, buf: &mut &[u8]) -> Result<String, DecodeError> {
    let data = decode_length_delimited(buf)?;
    String::from_utf8(data.to_vec()).map_err(|_| DecodeError::Utf8(field_number))
}

pub fn decode_float(buf: &mut &[u8]) -> Result<f32, DecodeError> {
    let Some((value, rest)) = buf.split_first_chunk::<4>() else {
        return Err(DecodeError::Truncated);
    };
    *buf = rest;
    Ok(f32::from_le_bytes(*value))
}

/// Decode an embedded message field.
pub fn decode_message<M: grpc::Message>(buf: &mut &[u8]) -> Result<M, DecodeError> {
    M::decode(decode_length_delimited(buf)?)
}

/// Check that a scalar field arrived with the wire type its schema expects.
pub fn expect_wire_type(actual: u8, expected: u8) -> Result<(), DecodeError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DecodeError::WireType(actual))
    }
}

/// Skip a field based on its wire type.
pub fn skip_field(wire_type: u8, buf: &mut &[u8]) -> Result<(), DecodeError> {
    let skip = |buf: &mut &[u8], n: usize| {
        if buf.len() < n {
            return Err(DecodeError::Truncated);
        }
        *buf = &buf[n..];
        Ok(())
    };

    match wire_type {
        WIRE_TYPE_VARINT => {
            decode_varint(buf)?;
            Ok(())
        }
        WIRE_TYPE_LEN => {
            decode_length_delimited(buf)?;
            Ok(())
        }
        WIRE_TYPE_FIXED64 => skip(buf, 8),
        WIRE_TYPE_FIXED32 => skip(buf, 4),
        other => Err(DecodeError::WireType(other)),
    }
}
