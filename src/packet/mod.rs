//! DTSC packet envelope
//!
//! Every DTSC unit on the wire or on disk is a length-prefixed envelope
//! identified by a 4-byte magic:
//!
//! ```text
//! Header   : "DTSC" | len(4) | DTMI root object
//! V1 data  : "DTPD" | len(4) | DTMI root object (time/data members)
//! V2 data  : "DTP2" | len(4) | track(4) | time(8) | DTMI object body
//! ```
//!
//! `len` is big-endian and excludes the 8 bytes of magic + length itself.
//! The V2 body optionally carries `offset`, `bpos` and `keyframe` members
//! and always ends with the mandatory `data` string.
//!
//! A packet either owns its buffer or borrows a caller-owned slice; the
//! two modes are an explicit enum, never a flag. Typed field access goes
//! through [`Scan`] so no value tree is ever built on the hot path.

use bytes::{BufMut, BytesMut};

use crate::dtmi::codec::{TAG_INT, TAG_OBJECT, TAG_OBJECT_END, TAG_STR};
use crate::dtmi::Scan;
use crate::error::PacketError;

/// Magic for metadata header packets
pub const MAGIC_HEAD: &[u8; 4] = b"DTSC";
/// Magic for legacy V1 data packets
pub const MAGIC_V1: &[u8; 4] = b"DTPD";
/// Magic for V2 data packets
pub const MAGIC_V2: &[u8; 4] = b"DTP2";

/// V2 fixed header: magic(4) + len(4) + track(4) + time(8)
const V2_HEADER_SIZE: usize = 20;
/// V1/header payload starts right after magic + len
const PRELUDE_SIZE: usize = 8;

// Serialized size contributed by each part of a V2 packet. The fixed part
// covers magic, length, track id, timestamp, the object tag and the
// terminator; each optional member adds its name, tag and value bytes.
const V2_FIXED_COST: usize = 24;
const DATA_MEMBER_COST: usize = 11;
const OFFSET_MEMBER_COST: usize = 17;
const BPOS_MEMBER_COST: usize = 15;
const KEYFRAME_MEMBER_COST: usize = 19;

/// Wire kind of a packet, distinguished by its magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Stream metadata header
    Head,
    /// Legacy data packet
    V1,
    /// Data packet with fixed track/time header
    V2,
}

impl PacketKind {
    fn from_magic(magic: &[u8]) -> Option<Self> {
        match magic {
            m if m == MAGIC_HEAD => Some(PacketKind::Head),
            m if m == MAGIC_V1 => Some(PacketKind::V1),
            m if m == MAGIC_V2 => Some(PacketKind::V2),
            _ => None,
        }
    }
}

/// How `reinit` should treat the caller's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Copy the bytes into the packet's own (reused, geometrically grown)
    /// storage
    Copy,
    /// Keep a borrowed reference; no copy, no ownership
    Borrow,
}

/// Packet storage: exactly one of these holds at any time
#[derive(Debug)]
enum PacketBuffer<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
}

/// A validated DTSC packet envelope
#[derive(Debug)]
pub struct Packet<'a> {
    buffer: PacketBuffer<'a>,
    /// Valid envelope length (declared length + 8); 0 when null
    len: usize,
    kind: Option<PacketKind>,
}

impl Default for Packet<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Packet<'a> {
    /// Create a null packet
    pub fn new() -> Self {
        Self {
            buffer: PacketBuffer::Owned(Vec::new()),
            len: 0,
            kind: None,
        }
    }

    /// Create a packet borrowing `data`
    pub fn borrowed(data: &'a [u8]) -> Result<Self, PacketError> {
        let mut packet = Self::new();
        packet.reinit(data, BufferMode::Borrow)?;
        Ok(packet)
    }

    /// Create a packet owning a copy of `data`
    pub fn owned(data: &[u8]) -> Result<Packet<'static>, PacketError> {
        let mut packet = Packet::new();
        packet.reinit_copy(data)?;
        Ok(packet)
    }

    /// Re-stamp the envelope over new bytes
    ///
    /// Validates the magic and the declared length (`len + 8` must fit in
    /// the buffer); on failure the packet is left null and the previous
    /// owned storage, if any, stays allocated for reuse.
    pub fn reinit(&mut self, data: &'a [u8], mode: BufferMode) -> Result<(), PacketError> {
        let (kind, total) = match Self::validate(data) {
            Ok(validated) => validated,
            Err(err) => {
                self.len = 0;
                self.kind = None;
                return Err(err);
            }
        };
        match mode {
            BufferMode::Borrow => {
                self.buffer = PacketBuffer::Borrowed(data);
            }
            BufferMode::Copy => {
                self.copy_in(&data[..total]);
            }
        }
        self.len = total;
        self.kind = Some(kind);
        Ok(())
    }

    /// Reset to the invalid state, releasing owned memory
    pub fn null(&mut self) {
        self.buffer = PacketBuffer::Owned(Vec::new());
        self.len = 0;
        self.kind = None;
    }

    /// The packet's wire kind, `None` when null
    pub fn kind(&self) -> Option<PacketKind> {
        self.kind
    }

    /// Check whether the packet holds a validated envelope
    pub fn is_valid(&self) -> bool {
        self.kind.is_some()
    }

    /// Total envelope length in bytes (magic and length prefix included)
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the packet is null
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The validated envelope bytes
    pub fn bytes(&self) -> &[u8] {
        let raw = match &self.buffer {
            PacketBuffer::Owned(vec) => vec.as_slice(),
            PacketBuffer::Borrowed(slice) => slice,
        };
        raw.get(..self.len).unwrap_or(&[])
    }

    /// Packet timestamp in milliseconds
    ///
    /// Read from the fixed V2 header, or from the DTMI body's `time`
    /// member for V1/header packets; callers never branch on the version.
    pub fn time(&self) -> u64 {
        match self.kind {
            Some(PacketKind::V2) => self
                .bytes()
                .get(12..20)
                .map(|raw| u64::from_be_bytes(raw.try_into().expect("8-byte slice")))
                .unwrap_or(0),
            Some(_) => self
                .scan()
                .and_then(|s| s.member("time"))
                .map(|m| m.as_u64())
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Track id this packet belongs to
    pub fn track_id(&self) -> u32 {
        match self.kind {
            Some(PacketKind::V2) => self
                .bytes()
                .get(8..12)
                .map(|raw| u32::from_be_bytes(raw.try_into().expect("4-byte slice")))
                .unwrap_or(0),
            Some(_) => self
                .scan()
                .and_then(|s| s.member("trackid"))
                .map(|m| m.as_u64() as u32)
                .unwrap_or(0),
            None => 0,
        }
    }

    /// The DTMI payload as a zero-copy cursor
    pub fn scan(&self) -> Option<Scan<'_>> {
        let start = match self.kind? {
            PacketKind::V2 => V2_HEADER_SIZE,
            PacketKind::V1 | PacketKind::Head => PRELUDE_SIZE,
        };
        self.bytes().get(start..).map(Scan::new)
    }

    /// The media payload (`data` member), empty when absent
    pub fn data(&self) -> &[u8] {
        self.scan()
            .and_then(|s| s.member("data"))
            .map(|m| m.as_bytes())
            .unwrap_or(&[])
    }

    /// Presentation-time offset, when carried
    pub fn offset(&self) -> Option<u64> {
        self.scan()?.member("offset").map(|m| m.as_u64())
    }

    /// Absolute byte position, when carried (VOD streams)
    pub fn byte_pos(&self) -> Option<u64> {
        self.scan()?.member("bpos").map(|m| m.as_u64())
    }

    /// Check whether this packet starts a keyframe
    pub fn is_keyframe(&self) -> bool {
        self.scan()
            .and_then(|s| s.member("keyframe"))
            .map(|m| m.as_bool())
            .unwrap_or(false)
    }

    /// An integer member of the payload by name
    pub fn member_u64(&self, name: &str) -> Option<u64> {
        self.scan()?.member(name).map(|m| m.as_u64())
    }

    /// A byte-string member of the payload by name
    pub fn member_bytes(&self, name: &str) -> Option<&[u8]> {
        self.scan()?.member(name).map(|m| m.as_bytes())
    }

    /// Copy this packet into one that owns its storage
    pub fn to_owned(&self) -> Packet<'static> {
        Packet {
            buffer: PacketBuffer::Owned(self.bytes().to_vec()),
            len: self.len,
            kind: self.kind,
        }
    }

    /// Validate magic and declared length; returns (kind, total length)
    fn validate(data: &[u8]) -> Result<(PacketKind, usize), PacketError> {
        if data.len() < PRELUDE_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }
        let kind = PacketKind::from_magic(&data[..4]).ok_or_else(|| {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&data[..4]);
            tracing::warn!(?magic, "Rejecting packet with unknown magic");
            PacketError::UnknownMagic(magic)
        })?;
        let declared = u32::from_be_bytes(data[4..8].try_into().expect("4-byte slice"));
        let total = declared as usize + PRELUDE_SIZE;
        if total > data.len() {
            tracing::warn!(
                declared,
                available = data.len(),
                "Rejecting packet with inconsistent length"
            );
            return Err(PacketError::BadLength {
                declared,
                available: data.len(),
            });
        }
        Ok((kind, total))
    }

    /// Copy bytes into owned storage, growing it geometrically
    fn copy_in(&mut self, data: &[u8]) {
        let vec = match &mut self.buffer {
            PacketBuffer::Owned(vec) => vec,
            PacketBuffer::Borrowed(_) => {
                self.buffer = PacketBuffer::Owned(Vec::new());
                match &mut self.buffer {
                    PacketBuffer::Owned(vec) => vec,
                    PacketBuffer::Borrowed(_) => unreachable!(),
                }
            }
        };
        if vec.capacity() < data.len() {
            let mut cap = vec.capacity().max(512);
            while cap < data.len() {
                cap = cap.saturating_mul(2);
            }
            vec.reserve_exact(cap - vec.len());
        }
        vec.clear();
        vec.extend_from_slice(data);
    }

    fn reinit_copy(&mut self, data: &[u8]) -> Result<(), PacketError> {
        let (kind, total) = match Self::validate(data) {
            Ok(validated) => validated,
            Err(err) => {
                self.len = 0;
                self.kind = None;
                return Err(err);
            }
        };
        self.copy_in(&data[..total]);
        self.len = total;
        self.kind = Some(kind);
        Ok(())
    }
}

impl Packet<'static> {
    /// Build a fresh V2 data packet
    ///
    /// The single canonical constructor: the exact serialized size of each
    /// part is known up front (time and track live in the fixed header;
    /// `offset`, `bpos` and `keyframe` each cost a fixed number of bytes
    /// and are only written when non-default), so the buffer is allocated
    /// once and the length field is exact from the start.
    pub fn generic_fill(
        time: u64,
        offset: u64,
        track: u32,
        data: &[u8],
        byte_pos: Option<u64>,
        is_keyframe: bool,
    ) -> Packet<'static> {
        let total = V2_FIXED_COST
            + DATA_MEMBER_COST
            + data.len()
            + if offset != 0 { OFFSET_MEMBER_COST } else { 0 }
            + if byte_pos.is_some() { BPOS_MEMBER_COST } else { 0 }
            + if is_keyframe { KEYFRAME_MEMBER_COST } else { 0 };

        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(MAGIC_V2);
        buf.put_u32((total - PRELUDE_SIZE) as u32);
        buf.put_u32(track);
        buf.put_u64(time);
        buf.put_u8(TAG_OBJECT);
        if offset != 0 {
            put_int_member(&mut buf, "offset", offset);
        }
        if let Some(bpos) = byte_pos {
            put_int_member(&mut buf, "bpos", bpos);
        }
        if is_keyframe {
            put_int_member(&mut buf, "keyframe", 1);
        }
        put_name(&mut buf, "data");
        buf.put_u8(TAG_STR);
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
        buf.put_u16(0);
        buf.put_u8(TAG_OBJECT_END);
        debug_assert_eq!(buf.len(), total);

        Packet {
            buffer: PacketBuffer::Owned(buf.to_vec()),
            len: total,
            kind: Some(PacketKind::V2),
        }
    }
}

fn put_name(buf: &mut BytesMut, name: &str) {
    buf.put_u16(name.len() as u16);
    buf.put_slice(name.as_bytes());
}

fn put_int_member(buf: &mut BytesMut, name: &str, value: u64) {
    put_name(buf, name);
    buf.put_u8(TAG_INT);
    buf.put_u64(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtmi::{encode, DtmiValue};

    fn v1_packet() -> Vec<u8> {
        let mut obj = DtmiValue::object();
        obj.set("time", 250u64);
        obj.set("trackid", 7u64);
        obj.set("data", "payload");
        let body = encode(&obj);

        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC_V1);
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    #[test]
    fn test_generic_fill_concrete_bytes() {
        // Track 3, time 1500, data "abcd", no offset/bpos/keyframe
        let packet = Packet::generic_fill(1500, 0, 3, b"abcd", None, false);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"DTP2");
        expected.extend_from_slice(&31u32.to_be_bytes());
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x03]);
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0xDC]);
        expected.push(0xE0);
        expected.extend_from_slice(b"\x00\x04data\x02\x00\x00\x00\x04abcd");
        expected.extend_from_slice(&[0x00, 0x00, 0xEE]);

        assert_eq!(packet.bytes(), &expected[..]);
        assert_eq!(packet.len(), expected.len());
    }

    #[test]
    fn test_generic_fill_roundtrip() {
        let packet = Packet::generic_fill(1500, 0, 3, b"abcd", None, false);
        assert_eq!(packet.kind(), Some(PacketKind::V2));
        assert_eq!(packet.track_id(), 3);
        assert_eq!(packet.time(), 1500);
        assert_eq!(packet.data(), b"abcd");
        assert_eq!(packet.offset(), None);
        assert_eq!(packet.byte_pos(), None);
        assert!(!packet.is_keyframe());
    }

    #[test]
    fn test_generic_fill_optional_members() {
        let packet = Packet::generic_fill(90000, 33, 1, b"frame", Some(4096), true);
        assert_eq!(packet.time(), 90000);
        assert_eq!(packet.offset(), Some(33));
        assert_eq!(packet.byte_pos(), Some(4096));
        assert!(packet.is_keyframe());
        assert_eq!(packet.data(), b"frame");

        // Exact size accounting: fixed + data + each optional member
        let expected = 24 + 11 + 5 + 17 + 15 + 19;
        assert_eq!(packet.len(), expected);
    }

    #[test]
    fn test_generic_fill_every_optional_combination() {
        for bits in 0..8u8 {
            let offset = if bits & 1 != 0 { 40 } else { 0 };
            let byte_pos = if bits & 2 != 0 { Some(123_456) } else { None };
            let keyframe = bits & 4 != 0;
            let packet = Packet::generic_fill(555, offset, 12, b"xyz", byte_pos, keyframe);

            let expected = 24
                + 11
                + 3
                + if offset != 0 { 17 } else { 0 }
                + if byte_pos.is_some() { 15 } else { 0 }
                + if keyframe { 19 } else { 0 };
            assert_eq!(packet.len(), expected, "combination {:03b}", bits);

            // And the envelope re-validates from its own bytes
            let reread = Packet::borrowed(packet.bytes()).unwrap();
            assert_eq!(reread.time(), 555);
            assert_eq!(reread.track_id(), 12);
            assert_eq!(reread.data(), b"xyz");
            assert_eq!(reread.offset(), if offset != 0 { Some(40) } else { None });
            assert_eq!(reread.byte_pos(), byte_pos);
            assert_eq!(reread.is_keyframe(), keyframe);
        }
    }

    #[test]
    fn test_generic_fill_bpos_zero_is_carried() {
        // A zero byte position is still a byte position (start of file)
        let packet = Packet::generic_fill(0, 0, 1, b"x", Some(0), false);
        assert_eq!(packet.byte_pos(), Some(0));
    }

    #[test]
    fn test_reinit_detects_kinds() {
        let v2 = Packet::generic_fill(1, 0, 1, b"d", None, false);
        assert_eq!(
            Packet::borrowed(v2.bytes()).unwrap().kind(),
            Some(PacketKind::V2)
        );

        let v1 = v1_packet();
        assert_eq!(
            Packet::borrowed(&v1).unwrap().kind(),
            Some(PacketKind::V1)
        );

        let mut head = v1_packet();
        head[..4].copy_from_slice(MAGIC_HEAD);
        assert_eq!(
            Packet::borrowed(&head).unwrap().kind(),
            Some(PacketKind::Head)
        );
    }

    #[test]
    fn test_v1_field_access_via_body() {
        let buf = v1_packet();
        let packet = Packet::borrowed(&buf).unwrap();
        assert_eq!(packet.time(), 250);
        assert_eq!(packet.track_id(), 7);
        assert_eq!(packet.data(), b"payload");
    }

    #[test]
    fn test_reinit_rejects_unknown_magic() {
        let mut buf = v1_packet();
        buf[..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            Packet::borrowed(&buf),
            Err(PacketError::UnknownMagic(_))
        ));
    }

    #[test]
    fn test_reinit_rejects_short_header() {
        assert!(matches!(
            Packet::borrowed(b"DTP"),
            Err(PacketError::TooShort(3))
        ));
        assert!(matches!(
            Packet::borrowed(b"DTP2\x00\x00"),
            Err(PacketError::TooShort(6))
        ));
    }

    #[test]
    fn test_reinit_rejects_inconsistent_length() {
        let mut buf = v1_packet();
        // Declare one byte more than the buffer holds
        let bad = (buf.len() - 8 + 1) as u32;
        buf[4..8].copy_from_slice(&bad.to_be_bytes());
        assert!(matches!(
            Packet::borrowed(&buf),
            Err(PacketError::BadLength { .. })
        ));
    }

    #[test]
    fn test_reinit_failure_leaves_packet_null() {
        let good = Packet::generic_fill(1, 0, 1, b"d", None, false);
        let mut packet = Packet::new();
        assert!(packet.reinit(b"XXXXXXXX", BufferMode::Borrow).is_err());
        assert!(!packet.is_valid());
        assert_eq!(packet.time(), 0);

        // And a later reinit over good bytes succeeds
        let bytes = good.bytes().to_vec();
        packet.reinit_copy(&bytes).unwrap();
        assert!(packet.is_valid());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        // Extra bytes after the declared envelope are not part of the packet
        let mut buf = Packet::generic_fill(5, 0, 2, b"ab", None, false)
            .bytes()
            .to_vec();
        let envelope = buf.len();
        buf.extend_from_slice(b"DTP2garbage");
        let packet = Packet::borrowed(&buf).unwrap();
        assert_eq!(packet.len(), envelope);
        assert_eq!(packet.data(), b"ab");
    }

    #[test]
    fn test_copy_mode_owns_independent_buffer() {
        let source = Packet::generic_fill(77, 0, 9, b"copied", None, false);
        let mut bytes = source.bytes().to_vec();
        let packet = Packet::owned(&bytes).unwrap();
        // Mutating the source buffer must not affect the owned packet
        bytes[12] = 0xFF;
        assert_eq!(packet.time(), 77);
        assert_eq!(packet.data(), b"copied");
    }

    #[test]
    fn test_owned_buffer_is_reused_across_reinits() {
        let small = Packet::generic_fill(1, 0, 1, b"a", None, false).bytes().to_vec();
        let large = Packet::generic_fill(2, 0, 1, &[0u8; 2048], None, false)
            .bytes()
            .to_vec();

        let mut packet = Packet::new();
        packet.reinit_copy(&large).unwrap();
        packet.reinit_copy(&small).unwrap();
        assert_eq!(packet.data(), b"a");
        packet.reinit_copy(&large).unwrap();
        assert_eq!(packet.data().len(), 2048);
    }

    #[test]
    fn test_null_resets_state() {
        let mut packet = Packet::generic_fill(1, 0, 1, b"d", None, false);
        assert!(packet.is_valid());
        packet.null();
        assert!(!packet.is_valid());
        assert!(packet.is_empty());
        assert_eq!(packet.bytes(), b"");
        assert_eq!(packet.data(), b"");
    }

    #[test]
    fn test_to_owned_outlives_source() {
        let buf = v1_packet();
        let owned = {
            let borrowed = Packet::borrowed(&buf).unwrap();
            borrowed.to_owned()
        };
        assert_eq!(owned.time(), 250);
        assert_eq!(owned.data(), b"payload");
    }
}
