//! Minimal protobuf wire-format reader.
//!
//! Decodes a byte buffer into `(tag, value)` pairs without a schema.
//! This is what lets the envelope decoder tolerate wrapper drift: a
//! field we have no declaration for is still visible as a varint or a
//! length-delimited blob, and blobs can be probed recursively.

use crate::error::{ProtoError, ProtoResult};
use bytes::Bytes;

/// One decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Varint(u64),
    Fixed64(u64),
    /// Length-delimited: nested message, string, bytes or packed scalars.
    Bytes(Bytes),
    Fixed32(u32),
}

/// One decoded field.
#[derive(Debug, Clone, PartialEq)]
pub struct WireField {
    pub tag: u32,
    pub value: WireValue,
}

impl WireField {
    /// The value as UTF-8 text, if length-delimited and valid.
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            WireValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// The value as raw bytes, if length-delimited.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.value {
            WireValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_varint(&self) -> Option<u64> {
        match self.value {
            WireValue::Varint(v) => Some(v),
            _ => None,
        }
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> ProtoResult<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*pos).ok_or(ProtoError::TruncatedVarint)?;
        *pos += 1;
        if shift >= 64 {
            return Err(ProtoError::TruncatedVarint);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Decode a buffer into its top-level fields.
///
/// Fails on truncation, deprecated group wire types, or zero tags, so
/// a successful parse is a strong signal the buffer really is a
/// message.
pub fn read_fields(buf: &Bytes) -> ProtoResult<Vec<WireField>> {
    let mut fields = Vec::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        let key = read_varint(buf, &mut pos)?;
        let tag = (key >> 3) as u32;
        let wire_type = (key & 0x07) as u8;
        if tag == 0 {
            return Err(ProtoError::InvalidTag);
        }

        let value = match wire_type {
            0 => WireValue::Varint(read_varint(buf, &mut pos)?),
            1 => {
                let end = pos.checked_add(8).filter(|&e| e <= buf.len());
                let end = end.ok_or(ProtoError::TruncatedField(tag))?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[pos..end]);
                pos = end;
                WireValue::Fixed64(u64::from_le_bytes(raw))
            }
            2 => {
                let len = read_varint(buf, &mut pos)? as usize;
                let end = pos.checked_add(len).filter(|&e| e <= buf.len());
                let end = end.ok_or(ProtoError::TruncatedField(tag))?;
                let slice = buf.slice(pos..end);
                pos = end;
                WireValue::Bytes(slice)
            }
            5 => {
                let end = pos.checked_add(4).filter(|&e| e <= buf.len());
                let end = end.ok_or(ProtoError::TruncatedField(tag))?;
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&buf[pos..end]);
                pos = end;
                WireValue::Fixed32(u32::from_le_bytes(raw))
            }
            other => return Err(ProtoError::UnsupportedWireType(other)),
        };

        fields.push(WireField { tag, value });
    }

    Ok(fields)
}

/// Probe whether a blob is plausibly a nested message with content.
///
/// Tags above 10k or a failed parse mean "probably a string or raw
/// bytes, not a message".
pub fn is_probable_message(buf: &Bytes) -> bool {
    if buf.is_empty() {
        return false;
    }
    match read_fields(buf) {
        Ok(fields) => !fields.is_empty() && fields.iter().all(|f| f.tag < 10_000),
        Err(_) => false,
    }
}

/// Varint-encode a value (test helper for building fixtures, also used
/// by the encoder below).
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append a length-delimited field.
pub fn encode_bytes_field(tag: u32, data: &[u8], out: &mut Vec<u8>) {
    encode_varint(u64::from(tag) << 3 | 2, out);
    encode_varint(data.len() as u64, out);
    out.extend_from_slice(data);
}

/// Append a varint field.
pub fn encode_varint_field(tag: u32, value: u64, out: &mut Vec<u8>) {
    encode_varint(u64::from(tag) << 3, out);
    encode_varint(value, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_fields() {
        let mut raw = Vec::new();
        encode_bytes_field(1, b"spot@public.aggre.bookTicker.v3.api.pb@100ms@ETHUSDT", &mut raw);
        encode_varint_field(6, 1_700_000_000_123, &mut raw);

        let fields = read_fields(&Bytes::from(raw)).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].tag, 1);
        assert!(fields[0].as_str().unwrap().contains("bookTicker"));
        assert_eq!(fields[1].as_varint(), Some(1_700_000_000_123));
    }

    #[test]
    fn test_truncated_rejected() {
        // Length-delimited field claiming 100 bytes with only 2 present.
        let raw = vec![0x0a, 100, 0x01, 0x02];
        assert!(read_fields(&Bytes::from(raw)).is_err());
    }

    #[test]
    fn test_probable_message() {
        let mut inner = Vec::new();
        encode_bytes_field(1, b"2000.5", &mut inner);
        assert!(is_probable_message(&Bytes::from(inner)));

        // Plain ASCII text usually fails the tag/wiretype structure.
        assert!(!is_probable_message(&Bytes::from_static(b"")));
    }

    #[test]
    fn test_zero_tag_rejected() {
        // key = 0 means tag 0 / varint, which no valid message emits.
        let raw = vec![0x00, 0x01];
        assert!(read_fields(&Bytes::from(raw)).is_err());
    }
}
