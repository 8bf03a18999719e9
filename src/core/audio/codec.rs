//! PCM16 audio frame codec.
//!
//! Converts captured linear PCM sample buffers to the base64 text encoding used
//! by `input_audio_buffer.append` and `response.audio.delta` events.
//!
//! # Audio Format
//!
//! The realtime protocol carries PCM 16-bit signed little-endian, mono, 24kHz.
//! Buffers with any other bit depth are skipped rather than converted.

use base64::prelude::*;
use bytes::{Bytes, BytesMut};

use crate::core::realtime::OPENAI_REALTIME_SAMPLE_RATE;

/// Bytes per PCM16 sample.
pub const PCM16_BYTES_PER_SAMPLE: usize = 2;

// =============================================================================
// Sample Buffers
// =============================================================================

/// Linear PCM layout of a sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// The only format the realtime protocol accepts: PCM16 mono at 24kHz.
    pub const REALTIME: PcmFormat = PcmFormat {
        sample_rate: OPENAI_REALTIME_SAMPLE_RATE,
        channels: 1,
        bits_per_sample: 16,
    };

    /// Size of one sample (one channel) in bytes.
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::REALTIME
    }
}

impl std::fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-bit {}ch {}Hz",
            self.bits_per_sample, self.channels, self.sample_rate
        )
    }
}

/// Backing storage of a captured buffer.
///
/// Capture hardware may hand out audio as a chain of blocks rather than one
/// contiguous region.
#[derive(Debug, Clone)]
pub enum SampleStorage {
    /// One contiguous block
    Contiguous(Bytes),
    /// A chain of blocks in playback order
    Segmented(Vec<Bytes>),
}

impl SampleStorage {
    /// Total number of bytes across all blocks.
    pub fn len(&self) -> usize {
        match self {
            Self::Contiguous(data) => data.len(),
            Self::Segmented(blocks) => blocks.iter().map(Bytes::len).sum(),
        }
    }

    /// Whether the storage holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the storage is a single block.
    pub fn is_contiguous(&self) -> bool {
        matches!(self, Self::Contiguous(_))
    }
}

/// A buffer of captured audio samples.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    format: PcmFormat,
    num_samples: usize,
    storage: SampleStorage,
}

impl SampleBuffer {
    /// Create a buffer from raw parts.
    ///
    /// `num_samples` is the number of samples as reported by the capture
    /// device; it is not checked against the storage length here.
    pub fn new(format: PcmFormat, num_samples: usize, storage: SampleStorage) -> Self {
        Self {
            format,
            num_samples,
            storage,
        }
    }

    /// Create a PCM16 mono buffer at the realtime sample rate.
    pub fn from_i16(samples: &[i16]) -> Self {
        let mut data = BytesMut::with_capacity(samples.len() * PCM16_BYTES_PER_SAMPLE);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(
            PcmFormat::REALTIME,
            samples.len(),
            SampleStorage::Contiguous(data.freeze()),
        )
    }

    /// Buffer format.
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Number of samples reported by the device.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Backing storage.
    pub fn storage(&self) -> &SampleStorage {
        &self.storage
    }

    /// Duration of the buffer in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let frames = self.num_samples as u64 / self.format.channels.max(1) as u64;
        frames * 1000 / self.format.sample_rate.max(1) as u64
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encode a PCM16 sample buffer as base64.
///
/// Returns `None` (and logs why) when:
/// - the buffer is not 16-bit PCM,
/// - the buffer contains no samples,
/// - fewer than `num_samples * 2` bytes can be read from the storage.
///
/// Segmented storage is flattened into one contiguous read.
pub fn encode(buffer: &SampleBuffer) -> Option<String> {
    let bytes_per_sample = buffer.format.bytes_per_sample();
    if buffer.format.bits_per_sample != 16 {
        tracing::warn!(
            "Sample buffer does not contain PCM16 data ({} bits per sample), skipping",
            buffer.format.bits_per_sample
        );
        return None;
    }

    let byte_count = match buffer.num_samples.checked_mul(bytes_per_sample) {
        Some(0) => return None,
        Some(count) => count,
        None => {
            tracing::warn!(
                "Sample buffer claims {} samples, more than can be addressed, skipping",
                buffer.num_samples
            );
            return None;
        }
    };

    let data = match &buffer.storage {
        SampleStorage::Contiguous(data) => data.clone(),
        SampleStorage::Segmented(blocks) => {
            tracing::debug!(
                "Sample buffer is split across {} blocks, reading it contiguously",
                blocks.len()
            );
            let mut joined = BytesMut::with_capacity(byte_count);
            for block in blocks {
                joined.extend_from_slice(block);
                if joined.len() >= byte_count {
                    break;
                }
            }
            joined.freeze()
        }
    };

    if data.len() < byte_count {
        tracing::warn!(
            "Could not read audio data: expected {} bytes, storage holds {}",
            byte_count,
            data.len()
        );
        return None;
    }

    Some(BASE64_STANDARD.encode(&data[..byte_count]))
}

/// Decode a base64 audio payload into raw PCM16 bytes.
pub fn decode(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(payload)
}

/// Convert little-endian PCM16 bytes to samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_le_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(PCM16_BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_round_trip() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 37 - 8000) as i16).collect();
        let buffer = SampleBuffer::from_i16(&samples);

        let encoded = encode(&buffer).unwrap();
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded.len(), samples.len() * 2);
        assert_eq!(pcm16_le_to_samples(&decoded), samples);
    }

    #[test]
    fn test_encode_skips_non_pcm16() {
        let format = PcmFormat {
            bits_per_sample: 32,
            ..PcmFormat::REALTIME
        };
        let buffer = SampleBuffer::new(
            format,
            4,
            SampleStorage::Contiguous(Bytes::from(vec![0u8; 16])),
        );
        assert!(encode(&buffer).is_none());

        let format = PcmFormat {
            bits_per_sample: 8,
            ..PcmFormat::REALTIME
        };
        let buffer = SampleBuffer::new(format, 4, SampleStorage::Contiguous(Bytes::from(vec![0u8; 4])));
        assert!(encode(&buffer).is_none());
    }

    #[test]
    fn test_encode_empty_buffer() {
        let buffer = SampleBuffer::from_i16(&[]);
        assert!(encode(&buffer).is_none());
    }

    #[test]
    fn test_encode_segmented_storage() {
        let first = Bytes::from(vec![1u8, 0, 2, 0]);
        let second = Bytes::from(vec![3u8, 0]);
        let buffer = SampleBuffer::new(
            PcmFormat::REALTIME,
            3,
            SampleStorage::Segmented(vec![first, second]),
        );

        let decoded = decode(&encode(&buffer).unwrap()).unwrap();
        assert_eq!(decoded, vec![1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn test_encode_short_storage_fails() {
        let buffer = SampleBuffer::new(
            PcmFormat::REALTIME,
            10,
            SampleStorage::Segmented(vec![Bytes::from(vec![0u8; 6])]),
        );
        assert!(encode(&buffer).is_none());
    }

    #[test]
    fn test_encode_trims_to_reported_samples() {
        let buffer = SampleBuffer::new(
            PcmFormat::REALTIME,
            2,
            SampleStorage::Contiguous(Bytes::from(vec![9u8; 10])),
        );
        let decoded = decode(&encode(&buffer).unwrap()).unwrap();
        assert_eq!(decoded.len(), 4);
    }

    #[test]
    fn test_encode_oversized_sample_count_fails() {
        let buffer = SampleBuffer::new(
            PcmFormat::REALTIME,
            usize::MAX,
            SampleStorage::Contiguous(Bytes::from(vec![0u8; 4])),
        );
        assert!(encode(&buffer).is_none());
    }

    #[test]
    fn test_pcm16_odd_trailing_byte() {
        assert_eq!(pcm16_le_to_samples(&[0x01, 0x00, 0xff]), vec![1]);
        assert_eq!(pcm16_le_to_samples(&[0xff, 0xff]), vec![-1]);
    }

    #[test]
    fn test_buffer_duration() {
        let buffer = SampleBuffer::from_i16(&vec![0i16; 4800]);
        assert_eq!(buffer.duration_ms(), 200);
        assert_eq!(buffer.format(), PcmFormat::REALTIME);
        assert!(buffer.storage().is_contiguous());
    }

    #[test]
    fn test_format_display() {
        assert_eq!(PcmFormat::REALTIME.to_string(), "16-bit 1ch 24000Hz");
    }
}
