//! DTMI value types
//!
//! The in-memory tree representation of the DTMI encoding. A value is an
//! integer, a byte string, or an object holding named members. Member order
//! is part of the wire contract, so objects keep an ordered list rather
//! than a hash map; names within one object are unique.

use bytes::Bytes;

/// In-memory DTMI value
///
/// Strings are raw byte strings: besides text they carry packed index
/// arrays and codec init data, so no UTF-8 requirement is imposed.
#[derive(Debug, Clone, PartialEq)]
pub enum DtmiValue {
    /// 64-bit unsigned integer (tag 0x01)
    Int(u64),

    /// Length-prefixed byte string (tag 0x02)
    Str(Bytes),

    /// Ordered named members (tag 0xE0, root and nested encode identically)
    Object(Vec<(String, DtmiValue)>),
}

impl DtmiValue {
    /// Create an empty object
    pub fn object() -> Self {
        DtmiValue::Object(Vec::new())
    }

    /// Try to get this value as an integer
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DtmiValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as raw bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DtmiValue::Str(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get this value as a UTF-8 string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DtmiValue::Str(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to get this value's members
    pub fn as_object(&self) -> Option<&[(String, DtmiValue)]> {
        match self {
            DtmiValue::Object(members) => Some(members),
            _ => None,
        }
    }

    /// Check whether this value is an object
    pub fn is_object(&self) -> bool {
        matches!(self, DtmiValue::Object(_))
    }

    /// Get a member of an object value by name
    pub fn member(&self, name: &str) -> Option<&DtmiValue> {
        self.as_object()?
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Get an integer member of an object value
    pub fn member_u64(&self, name: &str) -> Option<u64> {
        self.member(name)?.as_u64()
    }

    /// Get a byte-string member of an object value
    pub fn member_bytes(&self, name: &str) -> Option<&[u8]> {
        self.member(name)?.as_bytes()
    }

    /// Get a string member of an object value
    pub fn member_str(&self, name: &str) -> Option<&str> {
        self.member(name)?.as_str()
    }

    /// Set a member on an object value
    ///
    /// Replaces an existing member of the same name in place, keeping the
    /// insertion order of the remaining members. No-op on non-objects.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<DtmiValue>) {
        if let DtmiValue::Object(members) = self {
            let name = name.into();
            let value = value.into();
            if let Some(slot) = members.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = value;
            } else {
                members.push((name, value));
            }
        }
    }
}

impl Default for DtmiValue {
    fn default() -> Self {
        DtmiValue::Object(Vec::new())
    }
}

impl From<u64> for DtmiValue {
    fn from(v: u64) -> Self {
        DtmiValue::Int(v)
    }
}

impl From<u32> for DtmiValue {
    fn from(v: u32) -> Self {
        DtmiValue::Int(v as u64)
    }
}

impl From<u16> for DtmiValue {
    fn from(v: u16) -> Self {
        DtmiValue::Int(v as u64)
    }
}

impl From<bool> for DtmiValue {
    fn from(v: bool) -> Self {
        DtmiValue::Int(v as u64)
    }
}

impl From<Bytes> for DtmiValue {
    fn from(v: Bytes) -> Self {
        DtmiValue::Str(v)
    }
}

impl From<Vec<u8>> for DtmiValue {
    fn from(v: Vec<u8>) -> Self {
        DtmiValue::Str(Bytes::from(v))
    }
}

impl From<&str> for DtmiValue {
    fn from(v: &str) -> Self {
        DtmiValue::Str(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for DtmiValue {
    fn from(v: String) -> Self {
        DtmiValue::Str(Bytes::from(v.into_bytes()))
    }
}
