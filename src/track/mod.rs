//! Per-track seek index
//!
//! A `Track` records one media stream's samples into three parallel,
//! independently-growing record arrays (parts, keys, fragments) plus the
//! scalar stream properties. The index is append-only by time and is
//! extended one packet at a time through [`Track::update`], so incremental
//! ingest never rewrites history.

pub mod record;

use std::io;

use bytes::Bytes;

use crate::dtmi::codec::{
    write_int_member, write_object_end, write_str_member, TAG_OBJECT,
};
use crate::dtmi::DtmiValue;

pub use record::{Fragment, FragmentArray, Key, KeyArray, Part, PartArray};

/// Keyframe interval in milliseconds for non-video tracks
///
/// Audio and metadata tracks have no real keyframes; a synthetic key is
/// recorded whenever this much time has passed since the previous one.
pub const AUDIO_KEY_INTERVAL: u64 = 5000;

/// Fragment duration in milliseconds used when the caller passes 0
pub const DEFAULT_FRAGMENT_DURATION: u64 = 1900;

/// Media type of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Video,
    Audio,
    /// Timed metadata (subtitles, cue points)
    Meta,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Video => "video",
            TrackType::Audio => "audio",
            TrackType::Meta => "meta",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "video" => TrackType::Video,
            "audio" => TrackType::Audio,
            _ => TrackType::Meta,
        }
    }
}

/// One media stream's index and properties
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: u32,
    pub track_type: TrackType,
    pub codec: String,
    /// Codec-specific initialization data (SPS/PPS, AudioSpecificConfig)
    pub init: Bytes,
    pub firstms: u64,
    pub lastms: u64,
    /// Average bitrate in bytes per second, derived once from the first
    /// closed fragment longer than a second
    pub bps: u32,

    // Audio parameters
    pub rate: u32,
    pub size: u16,
    pub channels: u16,

    // Video parameters
    pub width: u32,
    pub height: u32,
    /// Frames per kilosecond
    pub fpks: u32,

    parts: PartArray,
    keys: KeyArray,
    key_sizes: Vec<u32>,
    fragments: FragmentArray,
}

impl Track {
    /// Create an empty track
    pub fn new(track_id: u32, track_type: TrackType, codec: impl Into<String>) -> Self {
        Self {
            track_id,
            track_type,
            codec: codec.into(),
            init: Bytes::new(),
            firstms: 0,
            lastms: 0,
            bps: 0,
            rate: 0,
            size: 0,
            channels: 0,
            width: 0,
            height: 0,
            fpks: 0,
            parts: PartArray::new(),
            keys: KeyArray::new(),
            key_sizes: Vec::new(),
            fragments: FragmentArray::new(),
        }
    }

    pub fn parts(&self) -> &PartArray {
        &self.parts
    }

    pub fn keys(&self) -> &KeyArray {
        &self.keys
    }

    pub fn fragments(&self) -> &FragmentArray {
        &self.fragments
    }

    /// Per-key cumulative payload sizes, parallel to `keys`
    pub fn key_sizes(&self) -> &[u32] {
        &self.key_sizes
    }

    /// Indexed duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.lastms.saturating_sub(self.firstms)
    }

    /// Key lookup by sequential number
    ///
    /// O(1) offset from the oldest retained key; an out-of-range number
    /// yields an empty sentinel key, never a negative index.
    pub fn key(&self, number: u16) -> Key {
        let first = match self.keys.get(0) {
            Some(key) => key.number(),
            None => return Key::default(),
        };
        if number < first {
            return Key::default();
        }
        self.keys
            .get((number - first) as usize)
            .unwrap_or_default()
    }

    /// Extend the index with one received sample
    ///
    /// `time` must be monotone: an earlier timestamp than the last
    /// recorded one is dropped with a warning and the index is untouched.
    /// A `segment_hint` of 0 selects [`DEFAULT_FRAGMENT_DURATION`].
    pub fn update(
        &mut self,
        time: u64,
        offset: u32,
        data_size: u32,
        byte_pos: Option<u64>,
        is_keyframe: bool,
        segment_hint: u64,
    ) {
        if time < self.lastms {
            tracing::warn!(
                track = self.track_id,
                time,
                last = self.lastms,
                "Dropping out-of-order packet"
            );
            return;
        }

        // A part's duration is the time until the next sample, so the
        // previous part is back-filled now and the new one inherits the
        // same estimate until its successor arrives.
        let mut part = Part::default();
        part.set_size(data_size);
        part.set_offset(offset);
        if !self.parts.is_empty() {
            let duration = (time - self.lastms) as u32;
            self.parts.update_last(|p| p.set_duration(duration));
            part.set_duration(duration);
        }
        self.parts.push(part);
        self.lastms = time;

        let needs_key = is_keyframe
            || self.keys.is_empty()
            || (self.track_type != TrackType::Video
                && time.saturating_sub(self.keys.last().map(|k| k.time() as u64).unwrap_or(0))
                    >= AUDIO_KEY_INTERVAL);

        if needs_key {
            let mut key = Key::default();
            key.set_time(time.min(u32::MAX as u64) as u32);
            key.set_bpos(byte_pos.unwrap_or(0));
            if let Some(prev) = self.keys.last() {
                key.set_number(prev.number() + 1);
                let span = (time - prev.time() as u64) as u32;
                self.keys.update_last(|k| k.set_length(span));
            } else {
                key.set_number(1);
                self.firstms = time;
            }
            self.keys.push(key);
            self.key_sizes.push(0);

            let hint = if segment_hint == 0 {
                DEFAULT_FRAGMENT_DURATION
            } else {
                segment_hint
            };
            let needs_fragment = match self.fragments.last() {
                None => true,
                Some(frag) => {
                    let anchor = self.key(frag.first_key()).time() as u64;
                    time.saturating_sub(anchor) > hint
                }
            };
            if needs_fragment {
                if let Some(prev) = self.fragments.last() {
                    let anchor = self.key(prev.first_key()).time() as u64;
                    let duration = (time - anchor) as u32;
                    self.fragments.update_last(|f| f.set_duration(duration));
                    if self.bps == 0 && duration > 1000 {
                        self.bps = (prev.size() as u64 * 1000 / duration as u64) as u32;
                    }
                }
                let mut frag = Fragment::default();
                frag.set_key_count(1);
                frag.set_first_key(self.keys.last().map(|k| k.number()).unwrap_or(1));
                self.fragments.push(frag);
            } else {
                self.fragments
                    .update_last(|f| f.set_key_count(f.key_count().saturating_add(1)));
            }
        }

        self.keys
            .update_last(|k| k.set_parts(k.parts().saturating_add(1)));
        if let Some(last) = self.key_sizes.last_mut() {
            *last += data_size;
        }
        self.fragments
            .update_last(|f| f.set_size(f.size().saturating_add(data_size)));
    }

    /// Build the track's DTMI object (tree serialization path)
    pub fn to_dtmi(&self) -> DtmiValue {
        let mut obj = DtmiValue::object();
        obj.set(
            "fragments",
            DtmiValue::Str(Bytes::copy_from_slice(self.fragments.as_bytes())),
        );
        obj.set(
            "keys",
            DtmiValue::Str(Bytes::copy_from_slice(self.keys.as_bytes())),
        );
        obj.set("keysizes", DtmiValue::Str(Bytes::from(self.packed_key_sizes())));
        obj.set(
            "parts",
            DtmiValue::Str(Bytes::copy_from_slice(self.parts.as_bytes())),
        );
        obj.set("trackid", self.track_id as u64);
        obj.set("firstms", self.firstms);
        obj.set("lastms", self.lastms);
        obj.set("bps", self.bps as u64);
        obj.set("init", DtmiValue::Str(self.init.clone()));
        obj.set("codec", self.codec.as_str());
        obj.set("type", self.track_type.as_str());
        match self.track_type {
            TrackType::Audio => {
                obj.set("rate", self.rate as u64);
                obj.set("size", self.size as u64);
                obj.set("channels", self.channels as u64);
            }
            TrackType::Video => {
                obj.set("width", self.width as u64);
                obj.set("height", self.height as u64);
                obj.set("fpks", self.fpks as u64);
            }
            TrackType::Meta => {}
        }
        obj
    }

    /// Stream the track's DTMI object straight from the packed arrays
    ///
    /// Emits the exact bytes the tree path produces, member for member,
    /// without building a value tree.
    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[TAG_OBJECT])?;
        write_str_member(w, "fragments", self.fragments.as_bytes())?;
        write_str_member(w, "keys", self.keys.as_bytes())?;
        write_str_member(w, "keysizes", &self.packed_key_sizes())?;
        write_str_member(w, "parts", self.parts.as_bytes())?;
        write_int_member(w, "trackid", self.track_id as u64)?;
        write_int_member(w, "firstms", self.firstms)?;
        write_int_member(w, "lastms", self.lastms)?;
        write_int_member(w, "bps", self.bps as u64)?;
        write_str_member(w, "init", &self.init)?;
        write_str_member(w, "codec", self.codec.as_bytes())?;
        write_str_member(w, "type", self.track_type.as_str().as_bytes())?;
        match self.track_type {
            TrackType::Audio => {
                write_int_member(w, "rate", self.rate as u64)?;
                write_int_member(w, "size", self.size as u64)?;
                write_int_member(w, "channels", self.channels as u64)?;
            }
            TrackType::Video => {
                write_int_member(w, "width", self.width as u64)?;
                write_int_member(w, "height", self.height as u64)?;
                write_int_member(w, "fpks", self.fpks as u64)?;
            }
            TrackType::Meta => {}
        }
        write_object_end(w)
    }

    /// Rebuild a track from its DTMI object; absent members default
    pub fn from_dtmi(value: &DtmiValue) -> Self {
        let track_type = TrackType::from_name(value.member_str("type").unwrap_or(""));
        let mut track = Track::new(
            value.member_u64("trackid").unwrap_or(0) as u32,
            track_type,
            value.member_str("codec").unwrap_or(""),
        );
        track.fragments = FragmentArray::from_bytes(value.member_bytes("fragments").unwrap_or(&[]));
        track.keys = KeyArray::from_bytes(value.member_bytes("keys").unwrap_or(&[]));
        track.key_sizes = value
            .member_bytes("keysizes")
            .unwrap_or(&[])
            .chunks_exact(4)
            .map(|raw| u32::from_be_bytes(raw.try_into().expect("4-byte chunk")))
            .collect();
        track.parts = PartArray::from_bytes(value.member_bytes("parts").unwrap_or(&[]));
        track.firstms = value.member_u64("firstms").unwrap_or(0);
        track.lastms = value.member_u64("lastms").unwrap_or(0);
        track.bps = value.member_u64("bps").unwrap_or(0) as u32;
        track.init = Bytes::copy_from_slice(value.member_bytes("init").unwrap_or(&[]));
        track.rate = value.member_u64("rate").unwrap_or(0) as u32;
        track.size = value.member_u64("size").unwrap_or(0) as u16;
        track.channels = value.member_u64("channels").unwrap_or(0) as u16;
        track.width = value.member_u64("width").unwrap_or(0) as u32;
        track.height = value.member_u64("height").unwrap_or(0) as u32;
        track.fpks = value.member_u64("fpks").unwrap_or(0) as u32;
        track
    }

    // Raw record insertion, for deserializers only; index state is
    // otherwise mutated exclusively through update()
    pub(crate) fn push_part(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub(crate) fn push_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    pub(crate) fn push_key_size(&mut self, size: u32) {
        self.key_sizes.push(size);
    }

    pub(crate) fn push_fragment(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    fn packed_key_sizes(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(self.key_sizes.len() * 4);
        for size in &self.key_sizes {
            packed.extend_from_slice(&size.to_be_bytes());
        }
        packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtmi::encode;

    fn video_track() -> Track {
        Track::new(1, TrackType::Video, "H264")
    }

    fn audio_track() -> Track {
        Track::new(2, TrackType::Audio, "AAC")
    }

    #[test]
    fn test_first_packet() {
        let mut track = video_track();
        track.update(0, 0, 1000, None, true, 0);

        assert_eq!(track.parts().len(), 1);
        assert_eq!(track.keys().len(), 1);
        assert_eq!(track.fragments().len(), 1);

        // A single-packet track reports a zero-duration last part
        assert_eq!(track.parts().last().unwrap().duration(), 0);
        let key = track.keys().last().unwrap();
        assert_eq!(key.number(), 1);
        assert_eq!(key.parts(), 1);
        assert_eq!(track.key_sizes(), &[1000]);
        assert_eq!(track.fragments().last().unwrap().size(), 1000);
    }

    #[test]
    fn test_part_duration_backfill() {
        let mut track = video_track();
        track.update(0, 0, 100, None, true, 0);
        track.update(33, 0, 100, None, false, 0);
        track.update(66, 0, 100, None, false, 0);

        assert_eq!(track.parts().get(0).unwrap().duration(), 33);
        assert_eq!(track.parts().get(1).unwrap().duration(), 33);
        // Duration of the newest part is provisional until the next packet
        assert_eq!(track.parts().get(2).unwrap().duration(), 33);
        assert_eq!(track.lastms, 66);
        assert_eq!(track.keys().last().unwrap().parts(), 3);
    }

    #[test]
    fn test_out_of_order_packet_is_dropped() {
        let mut track = video_track();
        track.update(0, 0, 100, None, true, 0);
        track.update(100, 0, 100, None, false, 0);
        let before = track.clone();

        track.update(50, 0, 100, None, true, 0);

        assert_eq!(track, before);
    }

    #[test]
    fn test_video_keys_only_on_keyframes() {
        let mut track = video_track();
        track.update(0, 0, 100, None, true, 0);
        for t in 1..200u64 {
            track.update(t * 33, 0, 100, None, false, 0);
        }
        assert_eq!(track.keys().len(), 1);

        track.update(200 * 33, 0, 100, None, true, 0);
        assert_eq!(track.keys().len(), 2);
        assert_eq!(track.keys().last().unwrap().number(), 2);
        // Closing the first key back-fills its span
        assert_eq!(track.keys().get(0).unwrap().length(), 200 * 33);
    }

    #[test]
    fn test_audio_key_interval() {
        let mut track = audio_track();
        let step = AUDIO_KEY_INTERVAL / 2;
        let mut t = 0;
        while t <= 10 * AUDIO_KEY_INTERVAL {
            track.update(t, 0, 200, None, false, 0);
            t += step;
        }

        // One key roughly every AUDIO_KEY_INTERVAL (first packet included)
        let keys = track.keys().len();
        assert!((10..=11).contains(&keys), "got {} keys", keys);
    }

    #[test]
    fn test_fragment_rollover_and_duration() {
        let mut track = video_track();
        // Keyframe every second, default segment hint (1900 ms)
        for i in 0..5u64 {
            track.update(i * 1000, 0, 500, None, true, 0);
        }

        // Keys at 0 and 1000 share a fragment; 2000 starts the next one
        assert!(track.fragments().len() >= 2);
        let first = track.fragments().get(0).unwrap();
        assert_eq!(first.first_key(), 1);
        assert_eq!(first.key_count(), 2);
        assert_eq!(first.duration(), 2000);
    }

    #[test]
    fn test_fragment_hint_zero_uses_default() {
        let mut a = video_track();
        let mut b = video_track();
        for i in 0..5u64 {
            a.update(i * 1000, 0, 500, None, true, 0);
            b.update(i * 1000, 0, 500, None, true, DEFAULT_FRAGMENT_DURATION);
        }
        assert_eq!(a.fragments(), b.fragments());
    }

    #[test]
    fn test_bitrate_derived_once() {
        let mut track = video_track();
        for i in 0..10u64 {
            track.update(i * 1000, 0, 50_000, None, true, 0);
        }
        // First closed fragment: 2 keys * 50 KB over 2 s -> 50 KB/s
        assert_eq!(track.bps, 50_000);

        let bps = track.bps;
        for i in 10..20u64 {
            track.update(i * 1000, 0, 500, None, true, 0);
        }
        assert_eq!(track.bps, bps);
    }

    #[test]
    fn test_key_lookup_by_number() {
        let mut track = video_track();
        for i in 0..4u64 {
            track.update(i * 1000, 0, 100, None, true, 0);
        }

        assert_eq!(track.key(1).time(), 0);
        assert_eq!(track.key(3).time(), 2000);
        // Out of range yields the empty sentinel
        assert_eq!(track.key(0), Key::default());
        assert_eq!(track.key(99), Key::default());
    }

    #[test]
    fn test_key_records_byte_position() {
        let mut track = video_track();
        track.update(0, 0, 100, Some(8192), true, 0);
        assert_eq!(track.keys().last().unwrap().bpos(), 8192);

        track.update(1000, 0, 100, None, true, 0);
        assert_eq!(track.keys().last().unwrap().bpos(), 0);
    }

    #[test]
    fn test_dual_path_serialization_identical() {
        let mut track = audio_track();
        track.rate = 44100;
        track.channels = 2;
        track.size = 16;
        track.init = Bytes::from_static(&[0x12, 0x10]);
        for i in 0..40u64 {
            track.update(i * 250, 0, 300, None, false, 0);
        }

        let tree = encode(&track.to_dtmi());
        let mut streamed = Vec::new();
        track.write_to(&mut streamed).unwrap();
        assert_eq!(&tree[..], &streamed[..]);
    }

    #[test]
    fn test_dtmi_roundtrip() {
        let mut track = video_track();
        track.width = 1920;
        track.height = 1080;
        track.fpks = 30_000;
        track.init = Bytes::from_static(&[1, 2, 3, 4]);
        for i in 0..25u64 {
            track.update(i * 400, 10, 700, Some(i * 700), i % 5 == 0, 0);
        }

        let restored = Track::from_dtmi(&track.to_dtmi());
        assert_eq!(restored, track);
    }

    #[test]
    fn test_meta_track_has_no_codec_params() {
        let mut track = Track::new(9, TrackType::Meta, "JSON");
        track.update(0, 0, 20, None, false, 0);
        let obj = track.to_dtmi();
        assert!(obj.member("rate").is_none());
        assert!(obj.member("width").is_none());
        assert_eq!(obj.member_str("type"), Some("meta"));
    }
}
