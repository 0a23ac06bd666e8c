//! Stream metadata aggregate
//!
//! `Meta` maps track ids to their [`Track`] indexes and derives the
//! stream-level flags. It has two serializers that must stay byte-for-byte
//! identical: the tree path builds a [`DtmiValue`] and runs it through the
//! DTMI encoder (tooling), while the streaming path writes the same
//! members straight from the packed arrays into any `io::Write` sink
//! (network senders). Both follow one canonical member order, fixed here.

use std::collections::BTreeMap;
use std::io;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::dtmi::codec::{
    decode, write_int_member, write_name, write_object_end, write_object_head, TAG_OBJECT,
};
use crate::dtmi::DtmiValue;
use crate::error::DecodeError;
use crate::packet::{Packet, MAGIC_HEAD};
use crate::track::record::{Fragment, Key, Part};
use crate::track::{Track, TrackType};

/// Aggregated metadata for one stream
///
/// Index state is mutated exclusively through [`Meta::update`]; the
/// `vod`/`live` flags are recomputed on every update from whether the
/// packet carried an absolute byte position, so the two can never be set
/// independently.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    tracks: BTreeMap<u32, Track>,
    vod: bool,
    live: bool,
    merged: bool,
    buffer_window: u64,
    /// Memoized packed encoding, invalidated exactly on mutation
    packed: Option<Bytes>,
}

impl Meta {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a track; packets for undeclared tracks are ignored
    pub fn add_track(&mut self, track: Track) {
        self.packed = None;
        self.tracks.insert(track.track_id, track);
    }

    /// All declared tracks, ordered by id
    pub fn tracks(&self) -> &BTreeMap<u32, Track> {
        &self.tracks
    }

    /// A declared track by id
    pub fn track(&self, track_id: u32) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn is_vod(&self) -> bool {
        self.vod
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn merged(&self) -> bool {
        self.merged
    }

    pub fn set_merged(&mut self, merged: bool) {
        self.packed = None;
        self.merged = merged;
    }

    /// Live buffer window hint in milliseconds
    pub fn buffer_window(&self) -> u64 {
        self.buffer_window
    }

    pub fn set_buffer_window(&mut self, window_ms: u64) {
        self.packed = None;
        self.buffer_window = window_ms;
    }

    /// Extend the index with one data packet
    pub fn update(&mut self, packet: &Packet<'_>) {
        self.update_with_hint(packet, 0);
    }

    /// Extend the index with one data packet and an explicit fragment
    /// duration hint (0 selects the default)
    pub fn update_with_hint(&mut self, packet: &Packet<'_>, segment_hint: u64) {
        let track_id = packet.track_id();
        let track = match self.tracks.get_mut(&track_id) {
            Some(track) => track,
            None => {
                tracing::debug!(track = track_id, "Ignoring packet for undeclared track");
                return;
            }
        };

        let byte_pos = packet.byte_pos();
        track.update(
            packet.time(),
            packet.offset().unwrap_or(0) as u32,
            packet.data().len() as u32,
            byte_pos,
            packet.is_keyframe(),
            segment_hint,
        );

        // A byte position means the stream is backed by storage
        self.vod = byte_pos.is_some();
        self.live = !self.vod;
        self.packed = None;
    }

    /// Check whether the whole stream is indexed against on-disk offsets
    ///
    /// True only if every non-metadata track's last key carries a nonzero
    /// byte position; used to decide whether a VOD file needs a repair
    /// pass.
    pub fn is_fixed(&self) -> bool {
        self.tracks
            .values()
            .filter(|t| t.track_type != TrackType::Meta)
            .all(|t| t.keys().last().map(|k| k.bpos() > 0).unwrap_or(false))
    }

    /// Build the metadata's DTMI root object (tree serialization path)
    pub fn to_dtmi(&self) -> DtmiValue {
        let mut tracks = DtmiValue::object();
        for (id, track) in &self.tracks {
            tracks.set(format!("track_{}", id), track.to_dtmi());
        }
        let mut root = DtmiValue::object();
        root.set("tracks", tracks);
        if self.vod {
            root.set("vod", 1u64);
        }
        if self.live {
            root.set("live", 1u64);
        }
        if self.merged {
            root.set("merged", 1u64);
        }
        if self.buffer_window != 0 {
            root.set("buffer_window", self.buffer_window);
        }
        root
    }

    /// Stream the metadata straight from the packed arrays
    ///
    /// Byte-identical to encoding [`Meta::to_dtmi`]; this is the path
    /// network senders use, so no value tree is built.
    pub fn write_to<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[TAG_OBJECT])?;
        write_object_head(w, "tracks")?;
        for (id, track) in &self.tracks {
            write_name(w, &format!("track_{}", id))?;
            track.write_to(w)?;
        }
        write_object_end(w)?;
        if self.vod {
            write_int_member(w, "vod", 1)?;
        }
        if self.live {
            write_int_member(w, "live", 1)?;
        }
        if self.merged {
            write_int_member(w, "merged", 1)?;
        }
        if self.buffer_window != 0 {
            write_int_member(w, "buffer_window", self.buffer_window)?;
        }
        write_object_end(w)
    }

    /// The packed encoding, memoized until the next mutation
    pub fn packed(&mut self) -> Bytes {
        if let Some(cached) = &self.packed {
            return cached.clone();
        }
        let mut buf = Vec::new();
        self.write_to(&mut buf)
            .expect("writing to a Vec cannot fail");
        let bytes = Bytes::from(buf);
        self.packed = Some(bytes.clone());
        bytes
    }

    /// Write the metadata as a framed `DTSC` header packet
    pub fn send_header<W: io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        let packed = self.packed();
        w.write_all(MAGIC_HEAD)?;
        w.write_all(&(packed.len() as u32).to_be_bytes())?;
        w.write_all(&packed)
    }

    /// Rebuild metadata from its DTMI root object
    pub fn from_dtmi(value: &DtmiValue) -> Self {
        let mut meta = Meta::new();
        if let Some(tracks) = value.member("tracks").and_then(|t| t.as_object()) {
            for (_, track_value) in tracks {
                let track = Track::from_dtmi(track_value);
                meta.tracks.insert(track.track_id, track);
            }
        }
        meta.vod = value.member_u64("vod").unwrap_or(0) != 0;
        meta.live = value.member_u64("live").unwrap_or(0) != 0;
        meta.merged = value.member_u64("merged").unwrap_or(0) != 0;
        meta.buffer_window = value.member_u64("buffer_window").unwrap_or(0);
        meta
    }

    /// Rebuild metadata from encoded bytes
    ///
    /// Accepts either a bare DTMI object or a `DTSC`-framed header packet.
    pub fn from_buffer(data: &[u8]) -> Result<Self, DecodeError> {
        let body = if data.len() >= 8 && &data[..4] == MAGIC_HEAD {
            let declared =
                u32::from_be_bytes(data[4..8].try_into().expect("4-byte slice")) as usize;
            data.get(8..8 + declared).ok_or(DecodeError::Truncated)?
        } else {
            data
        };
        let (value, _) = decode(body)?;
        Ok(Meta::from_dtmi(&value))
    }

    /// The metadata as JSON, for tooling
    pub fn to_json(&self) -> Value {
        let mut tracks = serde_json::Map::new();
        for (id, track) in &self.tracks {
            tracks.insert(format!("track_{}", id), track_json(track));
        }
        json!({
            "tracks": tracks,
            "vod": self.vod,
            "live": self.live,
            "merged": self.merged,
            "buffer_window": self.buffer_window,
        })
    }

    /// Rebuild metadata from its JSON form; absent fields default
    pub fn from_json(value: &Value) -> Self {
        let mut meta = Meta::new();
        if let Some(tracks) = value.get("tracks").and_then(|t| t.as_object()) {
            for track_value in tracks.values() {
                let track = track_from_json(track_value);
                meta.tracks.insert(track.track_id, track);
            }
        }
        meta.vod = json_bool(value, "vod");
        meta.live = json_bool(value, "live");
        meta.merged = json_bool(value, "merged");
        meta.buffer_window = json_u64(value, "buffer_window");
        meta
    }
}

// Equality is over metadata state; the memo cell is not state
impl PartialEq for Meta {
    fn eq(&self, other: &Self) -> bool {
        self.tracks == other.tracks
            && self.vod == other.vod
            && self.live == other.live
            && self.merged == other.merged
            && self.buffer_window == other.buffer_window
    }
}

fn json_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

fn json_bool(value: &Value, key: &str) -> bool {
    value.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn track_json(track: &Track) -> Value {
    json!({
        "trackid": track.track_id,
        "type": track.track_type.as_str(),
        "codec": track.codec,
        "init": &track.init[..],
        "firstms": track.firstms,
        "lastms": track.lastms,
        "bps": track.bps,
        "rate": track.rate,
        "size": track.size,
        "channels": track.channels,
        "width": track.width,
        "height": track.height,
        "fpks": track.fpks,
        "fragments": track.fragments().iter().map(|f| json!({
            "duration": f.duration(),
            "keycount": f.key_count(),
            "firstkey": f.first_key(),
            "size": f.size(),
        })).collect::<Vec<_>>(),
        "keys": track.keys().iter().map(|k| json!({
            "bpos": k.bpos(),
            "length": k.length(),
            "number": k.number(),
            "parts": k.parts(),
            "time": k.time(),
        })).collect::<Vec<_>>(),
        "keysizes": track.key_sizes(),
        "parts": track.parts().iter().map(|p| json!({
            "size": p.size(),
            "duration": p.duration(),
            "offset": p.offset(),
        })).collect::<Vec<_>>(),
    })
}

fn track_from_json(value: &Value) -> Track {
    let track_type = TrackType::from_name(
        value.get("type").and_then(|v| v.as_str()).unwrap_or(""),
    );
    let codec = value
        .get("codec")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let mut track = Track::new(json_u64(value, "trackid") as u32, track_type, codec);
    track.init = value
        .get("init")
        .and_then(|v| v.as_array())
        .map(|raw| {
            raw.iter()
                .map(|b| b.as_u64().unwrap_or(0) as u8)
                .collect::<Vec<u8>>()
        })
        .map(Bytes::from)
        .unwrap_or_default();
    track.firstms = json_u64(value, "firstms");
    track.lastms = json_u64(value, "lastms");
    track.bps = json_u64(value, "bps") as u32;
    track.rate = json_u64(value, "rate") as u32;
    track.size = json_u64(value, "size") as u16;
    track.channels = json_u64(value, "channels") as u16;
    track.width = json_u64(value, "width") as u32;
    track.height = json_u64(value, "height") as u32;
    track.fpks = json_u64(value, "fpks") as u32;

    if let Some(raw) = value.get("fragments").and_then(|v| v.as_array()) {
        for entry in raw {
            let mut frag = Fragment::default();
            frag.set_duration(json_u64(entry, "duration") as u32);
            frag.set_key_count(json_u64(entry, "keycount") as u8);
            frag.set_first_key(json_u64(entry, "firstkey") as u16);
            frag.set_size(json_u64(entry, "size") as u32);
            track.push_fragment(frag);
        }
    }
    if let Some(raw) = value.get("keys").and_then(|v| v.as_array()) {
        for entry in raw {
            let mut key = Key::default();
            key.set_bpos(json_u64(entry, "bpos"));
            key.set_length(json_u64(entry, "length") as u32);
            key.set_number(json_u64(entry, "number") as u16);
            key.set_parts(json_u64(entry, "parts") as u16);
            key.set_time(json_u64(entry, "time") as u32);
            track.push_key(key);
        }
    }
    if let Some(raw) = value.get("keysizes").and_then(|v| v.as_array()) {
        for entry in raw {
            track.push_key_size(entry.as_u64().unwrap_or(0) as u32);
        }
    }
    if let Some(raw) = value.get("parts").and_then(|v| v.as_array()) {
        for entry in raw {
            let mut part = Part::default();
            part.set_size(json_u64(entry, "size") as u32);
            part.set_duration(json_u64(entry, "duration") as u32);
            part.set_offset(json_u64(entry, "offset") as u32);
            track.push_part(part);
        }
    }
    track
}
