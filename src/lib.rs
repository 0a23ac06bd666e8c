//! # dtsc-rs
//!
//! DTSC is the self-describing media metadata container underlying a
//! live/VOD streaming server: a nested binary value format (DTMI), a
//! zero-copy reader over it, a versioned packet envelope, and per-track
//! fixed-width seek indexes that extend incrementally as packets arrive.
//!
//! ```text
//! raw bytes ──► Packet (envelope detection)
//!                  │
//!                  ├─► Scan (lazy, zero-copy field access)
//!                  ├─► DtmiValue (full tree, tooling)
//!                  │
//!                  └─► Meta::update ──► Track index (parts/keys/fragments)
//!                           │
//!                           └─► Meta::write_to / packed (identical bytes
//!                               from either serialization path)
//!
//! live ingest ──► LiveBuffer ──► Ring cursors (one per consumer)
//! ```
//!
//! The two access styles (tree and scan) follow the same byte layout and
//! always agree on the same wire bytes; the index is append-only by time,
//! so a continuous stream can be ingested without ever rewriting history.
//!
//! # Example
//!
//! ```
//! use dtsc_rs::{Meta, Packet, Track, TrackType};
//!
//! let mut meta = Meta::new();
//! meta.add_track(Track::new(1, TrackType::Video, "H264"));
//!
//! let packet = Packet::generic_fill(0, 0, 1, b"frame", None, true);
//! meta.update(&packet);
//!
//! assert_eq!(meta.track(1).unwrap().keys().len(), 1);
//! assert!(meta.is_live());
//! ```

pub mod dtmi;
pub mod error;
pub mod live;
pub mod meta;
pub mod packet;
pub mod track;

pub use dtmi::{DtmiValue, Scan};
pub use error::{DecodeError, PacketError};
pub use live::{LiveBuffer, LiveConfig, Ring};
pub use meta::Meta;
pub use packet::{BufferMode, Packet, PacketKind};
pub use track::{Track, TrackType};
