//! Audio Test Fixtures
//!
//! Programmatically generated audio so tests need no external files.
//!
//! Audio formats:
//! - Sample rate: 24kHz (24000 Hz)
//! - Bit depth: 16-bit signed PCM, little-endian
//! - Channels: Mono

use std::f32::consts::PI;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use waav_realtime_client::core::audio::SampleBuffer;

/// Realtime sample rate (24kHz)
pub const SAMPLE_RATE: u32 = 24000;

/// Duration constants (in samples at 24kHz)
pub const MS_20: usize = 480;
pub const MS_100: usize = 2400;
pub const MS_200: usize = 4800;
pub const SECOND: usize = 24000;

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Generate a sine wave tone
pub fn generate_sine_wave(duration_samples: usize, frequency: f32, amplitude: f32) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / SAMPLE_RATE as f32;

    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

/// Generate a 440Hz (A4) reference tone
pub fn generate_a440_tone(duration_samples: usize) -> Vec<i16> {
    generate_sine_wave(duration_samples, 440.0, 0.5)
}

/// Speech-like pattern: a 150Hz voice with harmonics under a syllable envelope
pub fn generate_speech_pattern(duration_samples: usize) -> Vec<i16> {
    let base_freq = 150.0;
    let mut state: u64 = 54321;
    let mut envelope = 0.0f32;

    (0..duration_samples)
        .map(|i| {
            // New syllable every 50ms
            if i % 1200 == 0 {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                let target = ((state >> 16) & 0x7FFF) as f32 / 0x7FFF as f32;
                envelope = envelope * 0.7 + target * 0.3;
            }

            let t = i as f32 / SAMPLE_RATE as f32;
            let fundamental = (2.0 * PI * base_freq * t).sin();
            let harmonic2 = (2.0 * PI * base_freq * 2.0 * t).sin() * 0.5;
            let harmonic3 = (2.0 * PI * base_freq * 3.0 * t).sin() * 0.25;
            let waveform = (fundamental + harmonic2 + harmonic3) / 1.75;
            (waveform * envelope * i16::MAX as f32 * 0.6) as i16
        })
        .collect()
}

/// Convert i16 samples to little-endian bytes
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert bytes to i16 samples
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Base64 payload of a `response.audio.delta` carrying `samples`
pub fn audio_delta_payload(samples: &[i16]) -> String {
    BASE64_STANDARD.encode(samples_to_bytes(samples))
}

/// Capture buffer holding `samples` in the realtime format
pub fn capture_buffer(samples: &[i16]) -> SampleBuffer {
    SampleBuffer::from_i16(samples)
}

/// Calculate RMS (root mean square) amplitude
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_generation() {
        let silence = generate_silence(MS_200);
        assert_eq!(silence.len(), 4800);
        assert!(silence.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_sine_wave_generation() {
        let sine = generate_a440_tone(SECOND);
        assert_eq!(sine.len(), SECOND);
        let peak = sine.iter().map(|s| s.saturating_abs()).max().unwrap();
        assert!(peak > i16::MAX / 4);
    }

    #[test]
    fn test_speech_pattern_has_energy() {
        assert!(calculate_rms(&generate_speech_pattern(SECOND)) > 0.0);
    }

    #[test]
    fn test_samples_bytes_conversion() {
        let samples = vec![0i16, 1000, -1000, i16::MAX, i16::MIN];
        assert_eq!(bytes_to_samples(&samples_to_bytes(&samples)), samples);
    }
}
