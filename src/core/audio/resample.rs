//! Conversion between device audio and the realtime format.
//!
//! Devices deliver whatever their default configuration is: `f32`, `i16` or
//! `u16` samples, one or more interleaved channels, usually 44.1kHz or 48kHz.
//! Capture converts that to PCM16 mono 24kHz; playback goes the other way.

use std::collections::VecDeque;

use super::playback::PcmPlaybackQueue;

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

#[inline]
pub fn u16_to_f32(sample: u16) -> f32 {
    (sample as f32 - 32_768.0) / 32_768.0
}

/// Saturating conversion to PCM16.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn f32_to_u16(sample: f32) -> u16 {
    (sample * 32_768.0 + 32_768.0).round().clamp(0.0, u16::MAX as f32) as u16
}

/// Average each interleaved frame of `data` into one mono sample.
///
/// A trailing partial frame is averaged over the samples it has.
pub fn append_downmixed<T, F>(out: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        out.extend(data.iter().copied().map(&mut convert));
        return;
    }

    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().copied().map(&mut convert).sum();
        out.push(sum / frame.len() as f32);
    }
}

/// Streaming linear-interpolation resampler.
///
/// Keeps its position across calls so consecutive device buffers resample
/// without a seam.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Fractional read position into `pending`
    position: f64,
    pending: Vec<f32>,
    passthrough: bool,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let passthrough = from_rate == to_rate || from_rate == 0 || to_rate == 0;
        Self {
            step: if passthrough {
                1.0
            } else {
                from_rate as f64 / to_rate as f64
            },
            position: 0.0,
            pending: Vec::new(),
            passthrough,
        }
    }

    /// Resample `input` and append the result to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.passthrough {
            out.extend_from_slice(input);
            return;
        }

        self.pending.extend_from_slice(input);
        while self.position + 1.0 < self.pending.len() as f64 {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let a = self.pending[index];
            let b = self.pending[index + 1];
            out.push(a + (b - a) * frac);
            self.position += self.step;
        }

        let consumed = (self.position as usize).min(self.pending.len());
        self.pending.drain(..consumed);
        self.position -= consumed as f64;
    }
}

/// Device capture buffers to PCM16 mono 24kHz.
#[derive(Debug, Clone)]
pub struct CaptureConverter {
    channels: usize,
    resampler: LinearResampler,
    mono: Vec<f32>,
    resampled: Vec<f32>,
}

impl CaptureConverter {
    pub fn new(channels: u16, device_rate: u32, target_rate: u32) -> Self {
        Self {
            channels: usize::from(channels.max(1)),
            resampler: LinearResampler::new(device_rate, target_rate),
            mono: Vec::new(),
            resampled: Vec::new(),
        }
    }

    /// Convert one device buffer. May return no samples for very short input.
    pub fn convert<T, F>(&mut self, data: &[T], to_f32: F) -> Vec<i16>
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.mono.clear();
        self.resampled.clear();
        append_downmixed(&mut self.mono, data, self.channels, to_f32);
        self.resampler.process(&self.mono, &mut self.resampled);
        self.resampled.iter().copied().map(f32_to_i16).collect()
    }
}

/// 24kHz mono queue samples to device frames.
#[derive(Debug)]
pub struct PlaybackConverter {
    channels: usize,
    source_rate: u32,
    device_rate: u32,
    resampler: LinearResampler,
    ready: VecDeque<f32>,
    pulled: Vec<i16>,
    converted: Vec<f32>,
    resampled: Vec<f32>,
}

impl PlaybackConverter {
    pub fn new(channels: u16, source_rate: u32, device_rate: u32) -> Self {
        Self {
            channels: usize::from(channels.max(1)),
            source_rate,
            device_rate,
            resampler: LinearResampler::new(source_rate, device_rate),
            ready: VecDeque::new(),
            pulled: Vec::new(),
            converted: Vec::new(),
            resampled: Vec::new(),
        }
    }

    /// Fill an interleaved device buffer from `queue`, copying each mono
    /// sample to every channel. An empty queue plays silence.
    pub fn render<T, F>(&mut self, queue: &PcmPlaybackQueue, out: &mut [T], mut from_f32: F)
    where
        T: Copy,
        F: FnMut(f32) -> T,
    {
        let frames = out.len().div_ceil(self.channels);

        while self.ready.len() < frames {
            let missing = (frames - self.ready.len()) as u64;
            let chunk = (missing * u64::from(self.source_rate))
                .div_ceil(u64::from(self.device_rate.max(1)))
                .max(1) as usize
                + 1;

            self.pulled.resize(chunk, 0);
            queue.fill(&mut self.pulled);
            self.converted.clear();
            self.converted
                .extend(self.pulled.iter().copied().map(i16_to_f32));
            self.resampled.clear();
            self.resampler.process(&self.converted, &mut self.resampled);
            self.ready.extend(self.resampled.iter().copied());
        }

        for frame in out.chunks_mut(self.channels) {
            let sample = from_f32(self.ready.pop_front().unwrap_or(0.0));
            frame.fill(sample);
        }
    }
}
