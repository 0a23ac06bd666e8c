//! Zero-copy DTMI reader
//!
//! `Scan` is a cursor over a byte slice that already holds canonical DTMI
//! encoding. It walks members in place without allocating or materializing
//! a value tree, and it is the only decoder invoked directly on untrusted
//! network and file bytes, so every traversal step is bounds-checked:
//! anything that would read outside the slice comes back as `None` (or the
//! type's zero value for the `as_*` conversions), never as garbage.

use super::codec::{TAG_INT, TAG_OBJECT, TAG_OBJECT_END, TAG_STR};

/// Read-only cursor over encoded DTMI bytes
///
/// The slice starts at this value's type tag and may extend past the value's
/// end (the cursor knows where its own value stops, callers don't have to).
#[derive(Debug, Clone, Copy)]
pub struct Scan<'a> {
    data: &'a [u8],
}

impl<'a> Scan<'a> {
    /// Create a cursor over encoded bytes
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// The type tag of the value under the cursor
    pub fn tag(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Check whether the cursor points at an integer
    pub fn is_int(&self) -> bool {
        self.tag() == Some(TAG_INT)
    }

    /// Check whether the cursor points at a byte string
    pub fn is_str(&self) -> bool {
        self.tag() == Some(TAG_STR)
    }

    /// Check whether the cursor points at an object
    pub fn is_object(&self) -> bool {
        self.tag() == Some(TAG_OBJECT)
    }

    /// Encoded length of the value under the cursor
    ///
    /// `None` if the value is truncated or carries an unknown tag; nothing
    /// past the slice end is ever read.
    pub fn encoded_len(&self) -> Option<usize> {
        value_len(self.data)
    }

    /// Get a member of an object by name
    ///
    /// Linear scan over sibling entries using the same terminator and
    /// name-length discipline as the tree decoder. `None` when the cursor
    /// is not a complete object or no such member exists.
    pub fn member(&self, name: &str) -> Option<Scan<'a>> {
        self.find_member(|n, _| n == name.as_bytes())
    }

    /// Get the n-th member of an object (0-based)
    pub fn indice(&self, index: usize) -> Option<Scan<'a>> {
        let mut seen = 0usize;
        self.find_member(|_, _| {
            let hit = seen == index;
            seen += 1;
            hit
        })
    }

    /// Name of the n-th member of an object (0-based)
    pub fn named(&self, index: usize) -> Option<&'a str> {
        let mut seen = 0usize;
        let mut found = None;
        self.find_member(|name, _| {
            let hit = seen == index;
            seen += 1;
            if hit {
                found = Some(name);
            }
            hit
        })?;
        std::str::from_utf8(found?).ok()
    }

    /// Number of members of an object
    ///
    /// 0 when the cursor is not an object or the object is truncated.
    pub fn size(&self) -> usize {
        let mut count = 0usize;
        let _ = self.find_member(|_, _| {
            count += 1;
            false
        });
        count
    }

    /// The value as an unsigned integer
    ///
    /// Strings holding decimal digits are coerced; anything else is 0.
    pub fn as_u64(&self) -> u64 {
        match self.tag() {
            Some(TAG_INT) => self
                .data
                .get(1..9)
                .map(|raw| u64::from_be_bytes(raw.try_into().expect("8-byte slice")))
                .unwrap_or(0),
            Some(TAG_STR) => std::str::from_utf8(self.as_bytes())
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// The value as raw string bytes, empty on type mismatch or truncation
    pub fn as_bytes(&self) -> &'a [u8] {
        if self.tag() != Some(TAG_STR) {
            return &[];
        }
        let len = self
            .data
            .get(1..5)
            .map(|raw| u32::from_be_bytes(raw.try_into().expect("4-byte slice")) as usize)
            .unwrap_or(0);
        self.data.get(5..5 + len).unwrap_or(&[])
    }

    /// The value as UTF-8 text, empty on mismatch
    pub fn as_str(&self) -> &'a str {
        std::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    /// The value as a boolean (nonzero integer, or a numeric string)
    pub fn as_bool(&self) -> bool {
        self.as_u64() != 0
    }

    /// Walk object members until `pred` selects one, returning its value
    fn find_member(&self, mut pred: impl FnMut(&'a [u8], Scan<'a>) -> bool) -> Option<Scan<'a>> {
        if !self.is_object() {
            return None;
        }
        let data = self.data;
        let mut pos = 1usize;
        loop {
            let prefix = data.get(pos..pos + 2)?;
            if prefix == [0, 0] {
                // Terminator reached without a match
                return None;
            }
            let name_len = u16::from_be_bytes(prefix.try_into().expect("2-byte slice")) as usize;
            pos += 2;
            let name = data.get(pos..pos + name_len)?;
            pos += name_len;

            let rest = data.get(pos..)?;
            let value = Scan::new(rest);
            let len = value_len(rest)?;
            if pred(name, value) {
                return Some(value);
            }
            pos += len;
        }
    }
}

/// Encoded length of the value at the front of `data`
///
/// The central bounds check: every traversal step funnels through here, so
/// a truncated or unrecognized entry yields `None` instead of a read past
/// the end of the slice.
fn value_len(data: &[u8]) -> Option<usize> {
    match *data.first()? {
        TAG_INT => {
            if data.len() < 9 {
                None
            } else {
                Some(9)
            }
        }
        TAG_STR => {
            let raw = data.get(1..5)?;
            let len = u32::from_be_bytes(raw.try_into().expect("4-byte slice")) as usize;
            let total = 5usize.checked_add(len)?;
            if data.len() < total {
                None
            } else {
                Some(total)
            }
        }
        TAG_OBJECT => {
            let mut pos = 1usize;
            loop {
                let prefix = data.get(pos..pos + 2)?;
                if prefix == [0, 0] {
                    if *data.get(pos + 2)? != TAG_OBJECT_END {
                        return None;
                    }
                    return Some(pos + 3);
                }
                let name_len =
                    u16::from_be_bytes(prefix.try_into().expect("2-byte slice")) as usize;
                pos = pos.checked_add(2 + name_len)?;
                let inner = value_len(data.get(pos..)?)?;
                pos = pos.checked_add(inner)?;
            }
        }
        _ => None,
    }
}
