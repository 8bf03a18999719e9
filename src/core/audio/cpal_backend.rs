//! Capture and playback on the host's default audio devices through `cpal`.
//!
//! Both directions open the device's default configuration and convert in
//! the stream callback: capture downmixes and resamples to PCM16 mono 24kHz,
//! playback resamples the 24kHz queue to the device rate and fans it out
//! across channels. `f32`, `i16` and `u16` device samples are supported.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};

use super::AudioError;
use super::capture::{CaptureBackend, CaptureDevice, SampleSink};
use super::codec::{PcmFormat, SampleBuffer};
use super::playback::PcmPlaybackQueue;
use super::resample::{
    CaptureConverter, PlaybackConverter, f32_to_i16, f32_to_u16, i16_to_f32, u16_to_f32,
};
use super::stream_thread::StreamThread;

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

fn unsupported(direction: &str, name: &str, format: SampleFormat) -> AudioError {
    AudioError::UnsupportedFormat(format!(
        "{} device {} uses {:?} samples",
        direction, name, format
    ))
}

// =============================================================================
// Capture
// =============================================================================

/// Capture backend for the host's default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCaptureBackend;

impl CpalCaptureBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string()))?;
        let name = device_name(&device);

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceUnusable(format!("{}: {}", name, e)))?;
        let sample_format = supported.sample_format();
        if !matches!(
            sample_format,
            SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
        ) {
            return Err(unsupported("input", &name, sample_format));
        }
        let config: StreamConfig = supported.into();

        tracing::info!(
            "Using input device: {} ({} Hz, {} channels, {:?})",
            name,
            config.sample_rate.0,
            config.channels,
            sample_format
        );
        Ok(Box::new(CpalCaptureDevice {
            device: Some(device),
            config,
            sample_format,
            stream: None,
        }))
    }
}

struct CpalCaptureDevice {
    device: Option<cpal::Device>,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<StreamThread>,
}

fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sink: SampleSink,
    to_f32: fn(T) -> f32,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Copy + Send + 'static,
{
    let mut converter = CaptureConverter::new(
        config.channels,
        config.sample_rate.0,
        PcmFormat::REALTIME.sample_rate,
    );
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples = converter.convert(data, to_f32);
                if !samples.is_empty() {
                    sink(SampleBuffer::from_i16(&samples));
                }
            },
            |err| {
                tracing::error!("Input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::PipelineRejected(e.to_string()))
}

impl CaptureDevice for CpalCaptureDevice {
    /// Always the realtime format; device samples are converted in the callback.
    fn format(&self) -> PcmFormat {
        PcmFormat::REALTIME
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError> {
        let device = self
            .device
            .take()
            .ok_or_else(|| AudioError::InvalidState("capture device already started".to_string()))?;
        let config = self.config.clone();
        let sample_format = self.sample_format;

        let stream = StreamThread::spawn("realtime-capture", move || {
            let stream = match sample_format {
                SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, sink, |s| s),
                SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, sink, i16_to_f32),
                SampleFormat::U16 => build_capture_stream::<u16>(&device, &config, sink, u16_to_f32),
                other => Err(unsupported("input", &device_name(&device), other)),
            }?;
            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            Ok(stream)
        })?;

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        // The sink ignores buffers once the source is stopped, so the stream
        // thread is not waited for.
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

// =============================================================================
// Playback
// =============================================================================

/// Plays a [`PcmPlaybackQueue`] on the host's default output device.
///
/// Mono samples are duplicated across every output channel.
pub struct CpalPlayback {
    stream: StreamThread,
}

fn build_playback_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    queue: Arc<PcmPlaybackQueue>,
    from_f32: fn(f32) -> T,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Copy + Send + 'static,
{
    let mut converter = PlaybackConverter::new(
        config.channels,
        PcmFormat::REALTIME.sample_rate,
        config.sample_rate.0,
    );
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                converter.render(&queue, data, from_f32);
            },
            |err| {
                tracing::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

impl CpalPlayback {
    /// Open the default output device and start draining `queue`.
    pub fn start(queue: Arc<PcmPlaybackQueue>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string()))?;
        let name = device_name(&device);

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceUnusable(format!("{}: {}", name, e)))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        tracing::info!(
            "Using output device: {} ({} Hz, {} channels, {:?})",
            name,
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let stream = StreamThread::spawn("realtime-playback", move || {
            let stream = match sample_format {
                SampleFormat::F32 => build_playback_stream::<f32>(&device, &config, queue, |s| s),
                SampleFormat::I16 => {
                    build_playback_stream::<i16>(&device, &config, queue, f32_to_i16)
                }
                SampleFormat::U16 => {
                    build_playback_stream::<u16>(&device, &config, queue, f32_to_u16)
                }
                other => Err(unsupported("output", &name, other)),
            }?;
            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            Ok(stream)
        })?;

        Ok(Self { stream })
    }

    /// Stop the output stream without waiting for the device to close.
    pub fn stop(&mut self) {
        self.stream.stop();
    }
}
