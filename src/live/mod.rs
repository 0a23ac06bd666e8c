//! Live packet buffer and consumer cursors
//!
//! When a new client joins a live stream, it needs to start decoding at a
//! keyframe that is still in memory. The buffer keeps the most recent
//! packets keyed by (time, track) and grows its bound whenever eviction
//! would leave no keyframe retained, so every consumer can always seek
//! back to one as long as a single group of pictures fits.
//!
//! Concurrency model: one producer thread pushes packets and is the sole
//! mutator of the buffer map and the keyframe FIFO; any number of reader
//! threads each own exactly one [`Ring`] cursor and only touch their own
//! ring's counters. Ring registration is serialized with the producer by
//! one mutex. Nothing here blocks: a consumer that fell behind sees its
//! `starved` flag and must explicitly request a new position.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::packet::Packet;

/// Live buffer configuration options
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Minimum number of packets to retain
    pub buffer_count: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { buffer_count: 50 }
    }
}

impl LiveConfig {
    /// Set the minimum retained packet count
    pub fn buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count.max(1);
        self
    }
}

/// Composite ordering key: packets sort by time, then by track id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferKey {
    pub time: u64,
    pub track: u32,
}

/// Counters shared between a consumer's Ring handle and the producer
#[derive(Debug)]
struct RingShared {
    /// Distance from the newest packet; 0 is the newest
    pos: AtomicUsize,
    waiting: AtomicBool,
    starved: AtomicBool,
}

/// One consumer's cursor into the live buffer
///
/// Positions count backwards from the newest packet; each arriving packet
/// pushes every ring one position further into the past. A ring is owned
/// by exactly one consumer and is never shared between threads.
#[derive(Debug)]
pub struct Ring {
    shared: Arc<RingShared>,
}

impl Ring {
    /// Current position, as distance from the newest packet
    pub fn pos(&self) -> usize {
        self.shared.pos.load(Ordering::Acquire)
    }

    /// Check whether the producer recycled this cursor's buffer
    ///
    /// Once starved, the consumer must call [`Ring::request_newest`]; the
    /// position is meaningless until then.
    pub fn is_starved(&self) -> bool {
        self.shared.starved.load(Ordering::Acquire)
    }

    pub fn is_waiting(&self) -> bool {
        self.shared.waiting.load(Ordering::Acquire)
    }

    /// Ask the producer to reposition this ring at the newest packet
    ///
    /// Takes effect on the next arriving packet, which also clears the
    /// starved flag.
    pub fn request_newest(&self) {
        self.shared.waiting.store(true, Ordering::Release);
    }

    /// Step one buffer closer to the newest packet
    pub fn advance(&self) {
        let _ = self
            .shared
            .pos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pos| pos.checked_sub(1));
    }

    /// Check whether the cursor sits on the newest packet
    pub fn at_newest(&self) -> bool {
        self.pos() == 0
    }
}

#[derive(Debug, Default)]
struct BufferState {
    /// Current bound; starts at the configured minimum, grows only
    count: usize,
    buffers: BTreeMap<BufferKey, Arc<Packet<'static>>>,
    /// Keyframe positions (distance from newest), newest first
    keyframes: VecDeque<usize>,
}

/// Bounded, keyframe-aware buffer of recent live packets
pub struct LiveBuffer {
    state: RwLock<BufferState>,
    rings: Mutex<Vec<Arc<RingShared>>>,
}

impl LiveBuffer {
    /// Create a live buffer with default configuration
    pub fn new() -> Self {
        Self::with_config(LiveConfig::default())
    }

    /// Create a live buffer with custom configuration
    pub fn with_config(config: LiveConfig) -> Self {
        Self {
            state: RwLock::new(BufferState {
                count: config.buffer_count.max(1),
                buffers: BTreeMap::new(),
                keyframes: VecDeque::new(),
            }),
            rings: Mutex::new(Vec::new()),
        }
    }

    /// Ingest one packet; producer thread only
    ///
    /// Ages keyframe bookkeeping and every registered ring by one
    /// position, then evicts down to the bound. Eviction that would drop
    /// the last retained keyframe grows the bound by one instead, so the
    /// bound never shrinks and consumers always have a keyframe to seek
    /// to once one fits.
    pub fn push(&self, packet: Packet<'static>) {
        let mut state = self.state.write().expect("live buffer lock poisoned");

        for pos in state.keyframes.iter_mut() {
            *pos += 1;
        }
        if packet.is_keyframe() {
            state.keyframes.push_front(0);
        }

        let key = BufferKey {
            time: packet.time(),
            track: packet.track_id(),
        };
        state.buffers.insert(key, Arc::new(packet));

        while state.buffers.len() > state.count {
            let retains_keyframe = state.keyframes.iter().any(|pos| *pos < state.count);
            if !retains_keyframe {
                state.count += 1;
                tracing::debug!(count = state.count, "Growing live buffer to keep a keyframe");
                continue;
            }
            let oldest = *state
                .buffers
                .keys()
                .next()
                .expect("buffers checked non-empty");
            state.buffers.remove(&oldest);
        }
        // Forget keyframes that fell past the bound with the eviction
        while state.keyframes.back().map_or(false, |pos| *pos >= state.count) {
            state.keyframes.pop_back();
        }

        let rings = self.rings.lock().expect("ring table lock poisoned");
        for ring in rings.iter() {
            let pos = ring.pos.fetch_add(1, Ordering::AcqRel) + 1;
            if pos >= state.count {
                tracing::trace!(pos, count = state.count, "Ring starved");
                ring.starved.store(true, Ordering::Release);
                ring.pos.store(0, Ordering::Release);
            }
            if ring.waiting.swap(false, Ordering::AcqRel) {
                ring.pos.store(0, Ordering::Release);
                ring.starved.store(false, Ordering::Release);
            }
        }
    }

    /// Register a new consumer cursor
    ///
    /// The ring starts at the newest retained keyframe when one exists,
    /// so a late joiner begins at a decodable position.
    pub fn get_ring(&self) -> Ring {
        let state = self.state.read().expect("live buffer lock poisoned");
        let start = state.keyframes.front().copied().unwrap_or(0);
        let shared = Arc::new(RingShared {
            pos: AtomicUsize::new(start),
            waiting: AtomicBool::new(false),
            starved: AtomicBool::new(false),
        });
        self.rings
            .lock()
            .expect("ring table lock poisoned")
            .push(Arc::clone(&shared));
        drop(state);
        Ring { shared }
    }

    /// Unregister a consumer cursor
    pub fn drop_ring(&self, ring: Ring) {
        self.rings
            .lock()
            .expect("ring table lock poisoned")
            .retain(|shared| !Arc::ptr_eq(shared, &ring.shared));
    }

    /// The packet at a position (distance from newest), if still retained
    pub fn packet_at(&self, pos: usize) -> Option<Arc<Packet<'static>>> {
        let state = self.state.read().expect("live buffer lock poisoned");
        state.buffers.values().rev().nth(pos).cloned()
    }

    /// The packet under a ring's cursor; `None` while starved
    pub fn read(&self, ring: &Ring) -> Option<Arc<Packet<'static>>> {
        if ring.is_starved() {
            return None;
        }
        self.packet_at(ring.pos())
    }

    /// Number of packets currently retained
    pub fn len(&self) -> usize {
        self.state
            .read()
            .expect("live buffer lock poisoned")
            .buffers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bound on retained packets
    pub fn count(&self) -> usize {
        self.state
            .read()
            .expect("live buffer lock poisoned")
            .count
    }

    /// Check whether at least one keyframe is retained
    pub fn has_keyframe(&self) -> bool {
        !self
            .state
            .read()
            .expect("live buffer lock poisoned")
            .keyframes
            .is_empty()
    }

    /// Number of registered rings
    pub fn ring_count(&self) -> usize {
        self.rings.lock().expect("ring table lock poisoned").len()
    }
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}
