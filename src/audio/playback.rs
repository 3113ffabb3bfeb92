//! Gapless playback scheduling of inbound assistant audio.
//!
//! Each decoded chunk is placed at `max(cursor, device_now)` and the cursor
//! advances by the chunk's duration, so consecutive chunks play back-to-back.
//! Barge-in stops every scheduled source at once.

use crate::audio::codec::{self, PlayableBuffer};
use crate::error::Result;
use crate::transport::InboundChunk;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Identifies one scheduled playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

/// Notifications from an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The source finished playing naturally.
    Ended(SourceId),
}

/// An output device with a sample-accurate clock.
///
/// Implementations report [`PlaybackEvent::Ended`] on the channel they were
/// opened with once a source has played to completion. Stopped sources do
/// not report.
pub trait OutputDevice: Send {
    /// Current device clock in seconds.
    fn now(&self) -> f64;

    /// Start `buffer` at device time `start_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the buffer.
    fn schedule(&mut self, id: SourceId, buffer: PlayableBuffer, start_at: f64) -> Result<()>;

    /// Silence a source immediately, whether or not it has started.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to stop the source.
    fn stop(&mut self, id: SourceId) -> Result<()>;

    /// Release the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails to close.
    fn close(&mut self) -> Result<()>;
}

/// Where a chunk was placed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    /// Source identifier.
    pub id: SourceId,
    /// Device time at which playback begins.
    pub start_at: f64,
    /// Playback length in seconds.
    pub duration: f64,
}

impl ScheduledSource {
    /// Device time at which playback ends.
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Owns the output device for one session.
pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    active: BTreeSet<SourceId>,
    cursor: f64,
    next_id: u64,
    sample_rate: u32,
    closed: bool,
}

impl PlaybackScheduler {
    /// Create a scheduler decoding chunks at `sample_rate`.
    pub fn new(device: Box<dyn OutputDevice>, sample_rate: u32) -> Self {
        Self {
            device,
            active: BTreeSet::new(),
            cursor: 0.0,
            next_id: 0,
            sample_rate,
            closed: false,
        }
    }

    /// Decode `chunk` and schedule it right after everything already queued.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the payload is malformed, in which case
    /// nothing is scheduled and the cursor is unchanged.
    pub fn enqueue(&mut self, chunk: &InboundChunk) -> Result<ScheduledSource> {
        let buffer = codec::decode_pcm_chunk(&chunk.data, self.sample_rate)?;
        let duration = buffer.duration_secs();
        let start_at = self.cursor.max(self.device.now());
        let id = SourceId(self.next_id);
        self.next_id += 1;

        self.device.schedule(id, buffer, start_at)?;
        self.active.insert(id);
        self.cursor = start_at + duration;
        debug!(%id, start_at, duration, queued = self.active.len(), "chunk scheduled");

        Ok(ScheduledSource {
            id,
            start_at,
            duration,
        })
    }

    /// Record that a source finished. Returns `true` when this left the
    /// active set empty.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        if !self.active.remove(&id) {
            // Stopped by an interrupt before the end event arrived.
            return false;
        }
        let idle = self.active.is_empty();
        if idle {
            debug!("playback idle");
        }
        idle
    }

    /// Barge-in: stop every scheduled source, clear the set and reset the
    /// cursor to zero.
    pub fn interrupt(&mut self) {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active) {
            if let Err(e) = self.device.stop(id) {
                warn!(%id, "failed to stop source: {e}");
            }
        }
        self.cursor = 0.0;
        info!(stopped, "playback interrupted");
    }

    /// Stop everything and release the device. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.interrupt();
        self.closed = true;
        if let Err(e) = self.device.close() {
            warn!("failed to close output device: {e}");
        }
    }

    /// The next start time.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of sources scheduled and not yet finished.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
