//! Playback of synthesized audio.
//!
//! The session hands every `response.audio.delta` payload to a [`PlaybackSink`]
//! in arrival order and calls [`PlaybackSink::interrupt_and_flush`] on barge-in
//! and on disconnect.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::codec;

/// Destination for assistant audio.
pub trait PlaybackSink: Send + Sync {
    /// Queue a base64-encoded PCM16 fragment behind everything already queued.
    fn enqueue(&self, base64_pcm16: &str);

    /// Stop whatever is playing and discard everything queued.
    fn interrupt_and_flush(&self);
}

/// Default queue bound: two minutes of 24kHz audio.
pub const DEFAULT_MAX_BUFFERED_SAMPLES: usize = 24_000 * 120;

/// FIFO of decoded PCM16 samples drained by an audio output.
///
/// An output device pulls from the queue with [`PcmPlaybackQueue::fill`];
/// when the queue runs dry the remainder of the output buffer is silence.
/// The queue is bounded; once full, the oldest samples are discarded.
#[derive(Debug)]
pub struct PcmPlaybackQueue {
    samples: Mutex<VecDeque<i16>>,
    max_samples: usize,
    fragments: AtomicU64,
    interrupts: AtomicU64,
    rejected: AtomicU64,
    overflowed: AtomicU64,
}

impl Default for PcmPlaybackQueue {
    fn default() -> Self {
        Self::with_max_samples(DEFAULT_MAX_BUFFERED_SAMPLES)
    }
}

impl PcmPlaybackQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue holding at most `max_samples` samples.
    pub fn with_max_samples(max_samples: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            max_samples: max_samples.max(1),
            fragments: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Copy queued samples into `out`, padding with silence.
    ///
    /// Returns how many queued samples were written.
    pub fn fill(&self, out: &mut [i16]) -> usize {
        let mut samples = self.samples.lock();
        let available = samples.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(samples.drain(..available)) {
            *slot = sample;
        }
        for slot in &mut out[available..] {
            *slot = 0;
        }
        available
    }

    /// Number of samples waiting to be played.
    pub fn buffered_samples(&self) -> usize {
        self.samples.lock().len()
    }

    /// Whether nothing is waiting to be played.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Number of fragments accepted so far.
    pub fn fragment_count(&self) -> u64 {
        self.fragments.load(Ordering::Relaxed)
    }

    /// Number of interruptions so far.
    pub fn interrupt_count(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }

    /// Number of fragments that could not be decoded.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Number of queued samples discarded because the queue was full.
    pub fn overflowed_samples(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}

impl PlaybackSink for PcmPlaybackQueue {
    fn enqueue(&self, base64_pcm16: &str) {
        let data = match codec::decode(base64_pcm16) {
            Ok(data) => data,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to decode audio delta: {}", e);
                return;
            }
        };

        if data.len() % 2 != 0 {
            tracing::warn!(
                "Audio delta has an odd byte count ({}), dropping the trailing byte",
                data.len()
            );
        }

        let decoded = codec::pcm16_le_to_samples(&data);
        let discarded = {
            let mut samples = self.samples.lock();
            samples.extend(decoded);
            let excess = samples.len().saturating_sub(self.max_samples);
            samples.drain(..excess);
            excess
        };
        self.fragments.fetch_add(1, Ordering::Relaxed);

        if discarded > 0 {
            self.overflowed.fetch_add(discarded as u64, Ordering::Relaxed);
            tracing::warn!(
                "Playback queue full ({} samples), discarded {} oldest samples",
                self.max_samples,
                discarded
            );
        }
    }

    fn interrupt_and_flush(&self) {
        let flushed = {
            let mut samples = self.samples.lock();
            let flushed = samples.len();
            samples.clear();
            flushed
        };
        self.interrupts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Playback interrupted, flushed {} samples", flushed);
    }
}
