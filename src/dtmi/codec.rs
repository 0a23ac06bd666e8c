//! DTMI encoder and decoder
//!
//! DTMI is the tagged binary value format carried by DTSC packets and
//! headers. All multi-byte fields are big-endian.
//!
//! Type tags:
//! ```text
//! 0x01 - Int (8-byte unsigned)
//! 0x02 - Str (4-byte length + raw bytes)
//! 0xE0 - Object (members until the 00 00 EE terminator)
//! 0xEE - Object end (only valid inside the 00 00 EE sequence)
//! ```
//!
//! An object member is a 2-byte name length, the name bytes, then the
//! member's own encoding. Names are never written with length 0, so the
//! `00 00` prefix of the terminator cannot collide with a real member.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

use super::value::DtmiValue;

/// Integer type tag
pub const TAG_INT: u8 = 0x01;
/// String type tag
pub const TAG_STR: u8 = 0x02;
/// Object type tag (root and nested)
pub const TAG_OBJECT: u8 = 0xE0;
/// Final byte of the 00 00 EE object terminator
pub const TAG_OBJECT_END: u8 = 0xEE;

/// Maximum nesting depth for objects (prevent stack overflow)
const MAX_NESTING_DEPTH: usize = 64;

/// DTMI encoder
pub struct DtmiEncoder {
    buf: BytesMut,
}

impl DtmiEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Create encoder with specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Get current encoded length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if encoder is empty
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single DTMI value
    pub fn encode(&mut self, value: &DtmiValue) {
        match value {
            DtmiValue::Int(v) => {
                self.buf.put_u8(TAG_INT);
                self.buf.put_u64(*v);
            }
            DtmiValue::Str(data) => {
                self.buf.put_u8(TAG_STR);
                self.buf.put_u32(data.len() as u32);
                self.buf.put_slice(data);
            }
            DtmiValue::Object(members) => {
                self.buf.put_u8(TAG_OBJECT);
                for (name, member) in members {
                    // A zero-length name would collide with the terminator
                    if name.is_empty() {
                        continue;
                    }
                    self.write_name(name);
                    self.encode(member);
                }
                self.buf.put_u16(0);
                self.buf.put_u8(TAG_OBJECT_END);
            }
        }
    }

    /// Write a member name with its 2-byte length prefix (no type tag)
    fn write_name(&mut self, name: &str) {
        let len = name.len().min(0xFFFF);
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&name.as_bytes()[..len]);
    }
}

impl Default for DtmiEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a single value
pub fn encode(value: &DtmiValue) -> Bytes {
    let mut encoder = DtmiEncoder::new();
    encoder.encode(value);
    encoder.finish()
}

/// Decode a single value from the front of `data`
///
/// Returns the value and the number of bytes consumed. Truncated input is
/// rejected without reading past the buffer; an unrecognized type tag is
/// reported so callers can resynchronize on the next packet magic.
pub fn decode(data: &[u8]) -> Result<(DtmiValue, usize), DecodeError> {
    let mut pos = 0usize;
    let value = decode_value(data, &mut pos, 0)?;
    Ok((value, pos))
}

fn decode_value(data: &[u8], pos: &mut usize, depth: usize) -> Result<DtmiValue, DecodeError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(DecodeError::NestingTooDeep);
    }
    let tag = *data.get(*pos).ok_or(DecodeError::Truncated)?;
    *pos += 1;
    match tag {
        TAG_INT => {
            let raw = data
                .get(*pos..*pos + 8)
                .ok_or(DecodeError::Truncated)?
                .try_into()
                .expect("8-byte slice");
            *pos += 8;
            Ok(DtmiValue::Int(u64::from_be_bytes(raw)))
        }
        TAG_STR => {
            let raw: [u8; 4] = data
                .get(*pos..*pos + 4)
                .ok_or(DecodeError::Truncated)?
                .try_into()
                .expect("4-byte slice");
            *pos += 4;
            let len = u32::from_be_bytes(raw) as usize;
            let payload = data.get(*pos..*pos + len).ok_or(DecodeError::Truncated)?;
            *pos += len;
            Ok(DtmiValue::Str(Bytes::copy_from_slice(payload)))
        }
        TAG_OBJECT => decode_object(data, pos, depth),
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn decode_object(data: &[u8], pos: &mut usize, depth: usize) -> Result<DtmiValue, DecodeError> {
    let mut members = Vec::new();
    loop {
        // The 00 00 terminator prefix is checked before assuming a
        // name-length field; real names are never zero-length.
        let prefix = data.get(*pos..*pos + 2).ok_or(DecodeError::Truncated)?;
        if prefix == [0, 0] {
            let end = *data.get(*pos + 2).ok_or(DecodeError::Truncated)?;
            if end != TAG_OBJECT_END {
                return Err(DecodeError::UnknownTag(end));
            }
            *pos += 3;
            return Ok(DtmiValue::Object(members));
        }

        let name_len = u16::from_be_bytes(prefix.try_into().expect("2-byte slice")) as usize;
        *pos += 2;
        let name_bytes = data
            .get(*pos..*pos + name_len)
            .ok_or(DecodeError::Truncated)?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        *pos += name_len;

        let value = decode_value(data, pos, depth + 1)?;
        members.push((name, value));
    }
}

// Streaming writer primitives shared by the Track/Meta serializers. They
// emit the same bytes as the tree encoder above, member by member, so the
// two serialization paths cannot drift apart.

/// Write a member name with its 2-byte length prefix
pub(crate) fn write_name<W: io::Write>(w: &mut W, name: &str) -> io::Result<()> {
    w.write_all(&(name.len() as u16).to_be_bytes())?;
    w.write_all(name.as_bytes())
}

/// Write a named integer member
pub(crate) fn write_int_member<W: io::Write>(w: &mut W, name: &str, value: u64) -> io::Result<()> {
    write_name(w, name)?;
    w.write_all(&[TAG_INT])?;
    w.write_all(&value.to_be_bytes())
}

/// Write a named byte-string member
pub(crate) fn write_str_member<W: io::Write>(w: &mut W, name: &str, data: &[u8]) -> io::Result<()> {
    write_name(w, name)?;
    w.write_all(&[TAG_STR])?;
    w.write_all(&(data.len() as u32).to_be_bytes())?;
    w.write_all(data)
}

/// Open a named object member; close it with [`write_object_end`]
pub(crate) fn write_object_head<W: io::Write>(w: &mut W, name: &str) -> io::Result<()> {
    write_name(w, name)?;
    w.write_all(&[TAG_OBJECT])
}

/// Write the 00 00 EE object terminator
pub(crate) fn write_object_end<W: io::Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&[0, 0, TAG_OBJECT_END])
}
