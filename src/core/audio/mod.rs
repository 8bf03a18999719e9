//! Audio plumbing for realtime sessions.
//!
//! - `codec` - PCM16 buffers to and from base64
//! - `capture` - microphone capture sources and the capture manager
//! - `playback` - playback sinks for assistant audio
//! - `resample` - sample format, channel and rate conversion for device streams
//! - `stream_thread` - threads that own a device stream
//! - `cpal_backend` - device-backed capture and playback (feature `backend-cpal`)
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz in both directions.

pub mod capture;
pub mod codec;
#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;
pub mod playback;
pub mod resample;
pub mod stream_thread;

use std::sync::Arc;

use thiserror::Error;

pub use capture::{
    CaptureBackend, CaptureDevice, CaptureManager, CaptureState, CaptureTicket,
    MicrophoneSource, PushCaptureBackend, SampleCallback, SampleSink,
};
pub use codec::{PcmFormat, SampleBuffer, SampleStorage};
#[cfg(feature = "backend-cpal")]
pub use cpal_backend::{CpalCaptureBackend, CpalPlayback};
pub use playback::{DEFAULT_MAX_BUFFERED_SAMPLES, PcmPlaybackQueue, PlaybackSink};

/// Audio device setup and lifecycle errors.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No capture or output device is available
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but cannot be used as a capture device
    #[error("Device unusable: {0}")]
    DeviceUnusable(String),

    /// The capture pipeline refused the device input or the sample output
    #[error("Capture pipeline rejected device: {0}")]
    PipelineRejected(String),

    /// The device format cannot be used or converted
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failure while running a device stream
    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Audio endpoints of one realtime session.
#[derive(Clone)]
pub struct AudioIo {
    /// Capture manager shared by every session in the process
    pub capture: Arc<CaptureManager>,
    /// Destination for assistant audio
    pub playback: Arc<dyn PlaybackSink>,
}

impl AudioIo {
    /// Bundle a capture manager and a playback sink.
    pub fn new(capture: Arc<CaptureManager>, playback: Arc<dyn PlaybackSink>) -> Self {
        Self { capture, playback }
    }
}

impl std::fmt::Debug for AudioIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioIo")
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}
