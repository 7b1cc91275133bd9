//! Media Sinks
//!
//! Bounded buffers between the external streaming engine's decode
//! callbacks and the downstream consumer. The producer runs on the
//! engine's real-time callback thread and must never stall, so overflow
//! is resolved by evicting the oldest buffered unit; the consumer blocks
//! until data is available or the sink closes.
//!
//! Video and audio share the same buffering contract and differ only in
//! one policy point: a video key frame makes everything buffered before
//! it stale, so the video sink clears its queue before appending one.
//! The policy is a type parameter rather than a flag, giving each sink a
//! distinct type with the shared implementation.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, PoisonError};
use tracing::{debug, warn};

/// Default video sink capacity (bytes)
pub const DEFAULT_VIDEO_SINK_CAPACITY: usize = 4 * 1024 * 1024;

/// Default audio sink capacity (bytes)
pub const DEFAULT_AUDIO_SINK_CAPACITY: usize = 256 * 1024;

/// Kind of data carried by one buffer segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Compressed picture or sample data
    PictureData,
    /// Codec configuration preceding key-frame data
    CodecConfig,
}

/// Frame classification for a media unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Self-contained key frame
    Key,
    /// Frame referencing earlier frames
    Delta,
}

/// One segment of a media unit's payload
#[derive(Debug, Clone)]
pub struct BufferSegment {
    pub kind: BufferKind,
    pub data: Vec<u8>,
}

/// One decoder-ready unit delivered by the streaming engine
#[derive(Debug, Clone)]
pub struct MediaUnit {
    pub frame_number: u32,
    pub frame_kind: FrameKind,
    /// Host-side capture timestamp, milliseconds
    pub capture_time_ms: u64,
    /// Client-side receive timestamp, milliseconds
    pub receive_time_ms: u64,
    pub segments: Vec<BufferSegment>,
}

impl MediaUnit {
    /// A single-segment delta unit, the shape audio samples arrive in
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            frame_number: 0,
            frame_kind: FrameKind::Delta,
            capture_time_ms: 0,
            receive_time_ms: 0,
            segments: vec![BufferSegment {
                kind: BufferKind::PictureData,
                data,
            }],
        }
    }

    fn payload_len(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }
}

/// Queue-reset policy, the one point where video and audio sinks differ
pub trait SinkPolicy: Send + Sync + 'static {
    /// Whether buffered data becomes stale when this unit arrives
    fn reset_before(unit: &MediaUnit) -> bool;
}

/// Video policy: a key frame obsoletes everything buffered before it
pub struct KeyframeReset;

impl SinkPolicy for KeyframeReset {
    fn reset_before(unit: &MediaUnit) -> bool {
        unit.frame_kind == FrameKind::Key
    }
}

/// Audio policy: samples are only ever dropped by overflow eviction
pub struct DropOldest;

impl SinkPolicy for DropOldest {
    fn reset_before(_unit: &MediaUnit) -> bool {
        false
    }
}

/// Bounded sink for decoded video units
pub type VideoSink = MediaSink<KeyframeReset>;

/// Bounded sink for decoded audio samples
pub type AudioSink = MediaSink<DropOldest>;

struct SinkState {
    queue: VecDeque<Vec<u8>>,
    /// Bytes already consumed from the front unit
    front_pos: usize,
    buffered: usize,
    closed: bool,
}

/// Bounded byte queue with drop-oldest overflow and a blocking reader
///
/// Submission and eviction happen under one lock, so a reader never
/// observes the queue in an intermediate over-capacity state.
pub struct MediaSink<P: SinkPolicy> {
    state: Mutex<SinkState>,
    available: Condvar,
    capacity: usize,
    _policy: PhantomData<P>,
}

impl<P: SinkPolicy> MediaSink<P> {
    /// Sink holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sink capacity must be non-zero");
        Self {
            state: Mutex::new(SinkState {
                queue: VecDeque::new(),
                front_pos: 0,
                buffered: 0,
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            _policy: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one unit, evicting the oldest buffered data on overflow
    ///
    /// Never blocks. Submitting to a closed sink is a silent no-op.
    pub fn submit(&self, unit: &MediaUnit) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        if P::reset_before(unit) && state.buffered > 0 {
            debug!(
                frame = unit.frame_number,
                dropped = state.buffered,
                "key frame received, discarding stale queue"
            );
            state.queue.clear();
            state.front_pos = 0;
            state.buffered = 0;
        }

        let len = unit.payload_len();
        if len == 0 {
            return;
        }
        if len > self.capacity {
            warn!(
                frame = unit.frame_number,
                len,
                capacity = self.capacity,
                "media unit exceeds sink capacity, dropping"
            );
            return;
        }

        // Evict oldest units until the new one fits
        while state.buffered + len > self.capacity {
            let Some(front) = state.queue.pop_front() else {
                break;
            };
            state.buffered -= front.len() - state.front_pos;
            state.front_pos = 0;
        }

        let mut payload = Vec::with_capacity(len);
        for segment in &unit.segments {
            payload.extend_from_slice(&segment.data);
        }
        state.queue.push_back(payload);
        state.buffered += len;

        drop(state);
        self.available.notify_one();
    }

    /// Append raw sample bytes (audio fast path)
    pub fn submit_bytes(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.submit(&MediaUnit::from_bytes(data.to_vec()));
    }

    /// Blocking read into `buf`
    ///
    /// Returns as soon as at least one byte is available; returns 0 only
    /// after the sink is closed and drained (end of stream).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let mut guard = self.lock();
        while guard.buffered == 0 && !guard.closed {
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if guard.buffered == 0 {
            return 0;
        }

        let state = &mut *guard;
        let mut written = 0;
        while written < buf.len() {
            let Some(front) = state.queue.front() else {
                break;
            };
            let remaining = front.len() - state.front_pos;
            let take = remaining.min(buf.len() - written);
            buf[written..written + take]
                .copy_from_slice(&front[state.front_pos..state.front_pos + take]);
            written += take;
            state.buffered -= take;

            if take == remaining {
                state.queue.pop_front();
                state.front_pos = 0;
            } else {
                state.front_pos += take;
            }
        }

        written
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.lock().buffered
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the sink: discard buffered data and wake every blocked reader
    ///
    /// Idempotent; readers observe end of stream exactly once each.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.queue.clear();
        state.front_pos = 0;
        state.buffered = 0;
        drop(state);
        self.available.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
