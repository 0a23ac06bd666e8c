//! Fixed-width index records
//!
//! The per-track seek index is built from three record types packed into
//! append-only byte arrays. The packed arrays are the storage *and* the
//! serialized form, so writing a track out is a straight copy and loading
//! one never re-packs anything. All fields are big-endian.
//!
//! ```text
//! Part      (9 bytes): size(3) | duration(2) | offset(4)
//! Key      (16 bytes): bpos(5) | length(3) | number(2) | parts(2) | time(4)
//! Fragment (11 bytes): duration(4) | keycount(1) | firstkey(2) | size(4)
//! ```

/// Packed size of one Part record
pub const PART_SIZE: usize = 9;
/// Packed size of one Key record
pub const KEY_SIZE: usize = 16;
/// Packed size of one Fragment record
pub const FRAGMENT_SIZE: usize = 11;

fn read_u16(raw: &[u8]) -> u16 {
    u16::from_be_bytes(raw.try_into().expect("2-byte slice"))
}

fn read_u24(raw: &[u8]) -> u32 {
    (raw[0] as u32) << 16 | (raw[1] as u32) << 8 | raw[2] as u32
}

fn read_u32(raw: &[u8]) -> u32 {
    u32::from_be_bytes(raw.try_into().expect("4-byte slice"))
}

fn read_u40(raw: &[u8]) -> u64 {
    (raw[0] as u64) << 32
        | (raw[1] as u64) << 24
        | (raw[2] as u64) << 16
        | (raw[3] as u64) << 8
        | raw[4] as u64
}

fn write_u24(raw: &mut [u8], value: u32) {
    let v = value.min(0x00FF_FFFF);
    raw[0] = (v >> 16) as u8;
    raw[1] = (v >> 8) as u8;
    raw[2] = v as u8;
}

fn write_u40(raw: &mut [u8], value: u64) {
    let v = value.min(0xFF_FFFF_FFFF);
    raw[0] = (v >> 32) as u8;
    raw[1] = (v >> 24) as u8;
    raw[2] = (v >> 16) as u8;
    raw[3] = (v >> 8) as u8;
    raw[4] = v as u8;
}

/// One media sample: payload size, time until the next sample, and
/// presentation-time offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    raw: [u8; PART_SIZE],
}

impl Default for Part {
    fn default() -> Self {
        Self {
            raw: [0; PART_SIZE],
        }
    }
}

impl Part {
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        Some(Self {
            raw: raw.get(..PART_SIZE)?.try_into().ok()?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn size(&self) -> u32 {
        read_u24(&self.raw[0..3])
    }

    pub fn set_size(&mut self, size: u32) {
        write_u24(&mut self.raw[0..3], size);
    }

    pub fn duration(&self) -> u32 {
        read_u16(&self.raw[3..5]) as u32
    }

    pub fn set_duration(&mut self, duration: u32) {
        let v = duration.min(u16::MAX as u32) as u16;
        self.raw[3..5].copy_from_slice(&v.to_be_bytes());
    }

    pub fn offset(&self) -> u32 {
        read_u32(&self.raw[5..9])
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.raw[5..9].copy_from_slice(&offset.to_be_bytes());
    }
}

/// A keyframe (or synthetic interval marker) bounding one seekable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    raw: [u8; KEY_SIZE],
}

impl Default for Key {
    fn default() -> Self {
        Self { raw: [0; KEY_SIZE] }
    }
}

impl Key {
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        Some(Self {
            raw: raw.get(..KEY_SIZE)?.try_into().ok()?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Absolute byte position of this key's first packet, 0 when unknown
    pub fn bpos(&self) -> u64 {
        read_u40(&self.raw[0..5])
    }

    pub fn set_bpos(&mut self, bpos: u64) {
        write_u40(&mut self.raw[0..5], bpos);
    }

    /// Time span covered by this key in milliseconds
    pub fn length(&self) -> u32 {
        read_u24(&self.raw[5..8])
    }

    pub fn set_length(&mut self, length: u32) {
        write_u24(&mut self.raw[5..8], length);
    }

    /// Sequential key number, 1-based
    pub fn number(&self) -> u16 {
        read_u16(&self.raw[8..10])
    }

    pub fn set_number(&mut self, number: u16) {
        self.raw[8..10].copy_from_slice(&number.to_be_bytes());
    }

    /// Number of parts in this key
    pub fn parts(&self) -> u16 {
        read_u16(&self.raw[10..12])
    }

    pub fn set_parts(&mut self, parts: u16) {
        self.raw[10..12].copy_from_slice(&parts.to_be_bytes());
    }

    /// Key timestamp in milliseconds
    pub fn time(&self) -> u32 {
        read_u32(&self.raw[12..16])
    }

    pub fn set_time(&mut self, time: u32) {
        self.raw[12..16].copy_from_slice(&time.to_be_bytes());
    }
}

/// A run of consecutive keys, the unit of segment delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    raw: [u8; FRAGMENT_SIZE],
}

impl Default for Fragment {
    fn default() -> Self {
        Self {
            raw: [0; FRAGMENT_SIZE],
        }
    }
}

impl Fragment {
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        Some(Self {
            raw: raw.get(..FRAGMENT_SIZE)?.try_into().ok()?,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Fragment duration in milliseconds, back-filled on close-out
    pub fn duration(&self) -> u32 {
        read_u32(&self.raw[0..4])
    }

    pub fn set_duration(&mut self, duration: u32) {
        self.raw[0..4].copy_from_slice(&duration.to_be_bytes());
    }

    /// Number of keys grouped into this fragment
    pub fn key_count(&self) -> u8 {
        self.raw[4]
    }

    pub fn set_key_count(&mut self, count: u8) {
        self.raw[4] = count;
    }

    /// Number of the first key in this fragment
    pub fn first_key(&self) -> u16 {
        read_u16(&self.raw[5..7])
    }

    pub fn set_first_key(&mut self, number: u16) {
        self.raw[5..7].copy_from_slice(&number.to_be_bytes());
    }

    /// Cumulative payload size of this fragment in bytes
    pub fn size(&self) -> u32 {
        read_u32(&self.raw[7..11])
    }

    pub fn set_size(&mut self, size: u32) {
        self.raw[7..11].copy_from_slice(&size.to_be_bytes());
    }
}

macro_rules! record_array {
    ($array:ident, $record:ident, $record_size:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $array {
            data: Vec<u8>,
        }

        impl $array {
            pub fn new() -> Self {
                Self::default()
            }

            /// Load a packed array; a trailing partial record is dropped
            pub fn from_bytes(data: &[u8]) -> Self {
                let whole = data.len() - data.len() % $record_size;
                Self {
                    data: data[..whole].to_vec(),
                }
            }

            pub fn len(&self) -> usize {
                self.data.len() / $record_size
            }

            pub fn is_empty(&self) -> bool {
                self.data.is_empty()
            }

            pub fn get(&self, index: usize) -> Option<$record> {
                let start = index.checked_mul($record_size)?;
                $record::from_slice(self.data.get(start..start + $record_size)?)
            }

            pub fn last(&self) -> Option<$record> {
                self.get(self.len().checked_sub(1)?)
            }

            pub fn push(&mut self, record: $record) {
                self.data.extend_from_slice(record.as_bytes());
            }

            pub fn set(&mut self, index: usize, record: $record) {
                let start = index * $record_size;
                if let Some(slot) = self.data.get_mut(start..start + $record_size) {
                    slot.copy_from_slice(record.as_bytes());
                }
            }

            /// Modify the most recent record in place
            pub fn update_last(&mut self, f: impl FnOnce(&mut $record)) {
                if let Some(last) = self.len().checked_sub(1) {
                    if let Some(mut record) = self.get(last) {
                        f(&mut record);
                        self.set(last, record);
                    }
                }
            }

            /// The packed bytes, exactly as serialized
            pub fn as_bytes(&self) -> &[u8] {
                &self.data
            }

            pub fn iter(&self) -> impl Iterator<Item = $record> + '_ {
                (0..self.len()).filter_map(move |i| self.get(i))
            }
        }
    };
}

record_array!(PartArray, Part, PART_SIZE, "Packed array of Part records");
record_array!(KeyArray, Key, KEY_SIZE, "Packed array of Key records");
record_array!(
    FragmentArray,
    Fragment,
    FRAGMENT_SIZE,
    "Packed array of Fragment records"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_fields() {
        let mut part = Part::default();
        part.set_size(0x012345);
        part.set_duration(33);
        part.set_offset(0xDEADBEEF);

        assert_eq!(part.size(), 0x012345);
        assert_eq!(part.duration(), 33);
        assert_eq!(part.offset(), 0xDEADBEEF);
        assert_eq!(
            part.as_bytes(),
            &[0x01, 0x23, 0x45, 0x00, 0x21, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_part_field_saturation() {
        let mut part = Part::default();
        part.set_size(u32::MAX);
        part.set_duration(u32::MAX);
        assert_eq!(part.size(), 0x00FF_FFFF);
        assert_eq!(part.duration(), u16::MAX as u32);
    }

    #[test]
    fn test_key_fields() {
        let mut key = Key::default();
        key.set_bpos(0x01_2345_6789);
        key.set_length(4000);
        key.set_number(42);
        key.set_parts(120);
        key.set_time(90_000);

        assert_eq!(key.bpos(), 0x01_2345_6789);
        assert_eq!(key.length(), 4000);
        assert_eq!(key.number(), 42);
        assert_eq!(key.parts(), 120);
        assert_eq!(key.time(), 90_000);
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_key_bpos_saturation() {
        let mut key = Key::default();
        key.set_bpos(u64::MAX);
        assert_eq!(key.bpos(), 0xFF_FFFF_FFFF);
    }

    #[test]
    fn test_fragment_fields() {
        let mut frag = Fragment::default();
        frag.set_duration(1900);
        frag.set_key_count(3);
        frag.set_first_key(7);
        frag.set_size(1_000_000);

        assert_eq!(frag.duration(), 1900);
        assert_eq!(frag.key_count(), 3);
        assert_eq!(frag.first_key(), 7);
        assert_eq!(frag.size(), 1_000_000);
        assert_eq!(frag.as_bytes().len(), FRAGMENT_SIZE);
    }

    #[test]
    fn test_array_push_get_last() {
        let mut parts = PartArray::new();
        assert!(parts.is_empty());
        assert!(parts.last().is_none());

        for i in 0..5u32 {
            let mut part = Part::default();
            part.set_size(i * 100);
            parts.push(part);
        }

        assert_eq!(parts.len(), 5);
        assert_eq!(parts.get(2).unwrap().size(), 200);
        assert_eq!(parts.last().unwrap().size(), 400);
        assert!(parts.get(5).is_none());
        assert_eq!(parts.as_bytes().len(), 5 * PART_SIZE);
    }

    #[test]
    fn test_array_update_last() {
        let mut keys = KeyArray::new();
        let mut key = Key::default();
        key.set_number(1);
        keys.push(key);

        keys.update_last(|k| k.set_parts(k.parts() + 1));
        keys.update_last(|k| k.set_parts(k.parts() + 1));
        assert_eq!(keys.last().unwrap().parts(), 2);

        // No-op on an empty array
        let mut empty = KeyArray::new();
        empty.update_last(|k| k.set_parts(9));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_array_from_bytes_roundtrip() {
        let mut frags = FragmentArray::new();
        for i in 0..3u8 {
            let mut frag = Fragment::default();
            frag.set_key_count(i + 1);
            frags.push(frag);
        }

        let reloaded = FragmentArray::from_bytes(frags.as_bytes());
        assert_eq!(reloaded, frags);
        assert_eq!(reloaded.len(), 3);
    }

    #[test]
    fn test_array_from_bytes_drops_partial_tail() {
        let mut bytes = vec![0u8; 2 * KEY_SIZE];
        bytes[8..10].copy_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3]); // partial record
        let keys = KeyArray::from_bytes(&bytes);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.get(0).unwrap().number(), 1);
    }

    #[test]
    fn test_array_iter() {
        let mut parts = PartArray::new();
        for i in 1..=4u32 {
            let mut part = Part::default();
            part.set_size(i);
            parts.push(part);
        }
        let sizes: Vec<u32> = parts.iter().map(|p| p.size()).collect();
        assert_eq!(sizes, vec![1, 2, 3, 4]);
    }
}
