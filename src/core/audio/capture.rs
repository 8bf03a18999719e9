//! Microphone capture.
//!
//! A [`CaptureBackend`] opens a [`CaptureDevice`]; a [`MicrophoneSource`] wraps the
//! device and moves every captured buffer off the device's hardware thread onto a
//! dedicated tokio task where the registered async callback runs.
//!
//! ```text
//! hardware thread ──try_send──► bounded channel ──► capture worker task ──► callback
//! ```
//!
//! The hardware side never blocks: when the channel is full the newest buffer is
//! dropped. [`CaptureManager`] keeps at most one source running at a time.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::AudioError;
use super::codec::{PcmFormat, SampleBuffer};

/// Capacity of the channel between the hardware thread and the capture worker.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// Synchronous hand-off invoked by a device for every captured buffer.
///
/// Runs on the device's hardware thread and must return quickly.
pub type SampleSink = Box<dyn Fn(SampleBuffer) + Send + Sync>;

/// Async callback invoked once per captured buffer on the capture worker task.
pub type SampleCallback =
    Arc<dyn Fn(SampleBuffer) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Device Traits
// =============================================================================

/// Something that can open a capture device.
pub trait CaptureBackend: Send + Sync {
    /// Open the capture device.
    ///
    /// Fails with a setup error when no device exists or the device cannot be
    /// attached to a capture pipeline.
    fn open(&self) -> Result<Box<dyn CaptureDevice>, AudioError>;
}

/// An opened capture device.
pub trait CaptureDevice: Send {
    /// Format of the buffers this device delivers.
    fn format(&self) -> PcmFormat;

    /// Start delivering buffers to `sink`.
    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError>;

    /// Stop delivering buffers. Must be idempotent.
    fn stop(&mut self);
}

// =============================================================================
// Microphone Source
// =============================================================================

/// Lifecycle of a [`MicrophoneSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Opened, not yet started
    Idle,
    /// Delivering buffers
    Running,
    /// Stopped; a new source must be opened to capture again
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Running => write!(f, "Running"),
            CaptureState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Microphone capture source delivering PCM16 mono 24kHz buffers.
pub struct MicrophoneSource {
    device: Box<dyn CaptureDevice>,
    state: CaptureState,
    /// Cleared on stop; checked on both sides of the channel
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl MicrophoneSource {
    /// Open the backend's device and validate its format.
    pub fn open(backend: &dyn CaptureBackend) -> Result<Self, AudioError> {
        let device = backend.open()?;

        let format = device.format();
        if format != PcmFormat::REALTIME {
            return Err(AudioError::UnsupportedFormat(format!(
                "capture device delivers {}, expected {}",
                format,
                PcmFormat::REALTIME
            )));
        }

        Ok(Self {
            device,
            state: CaptureState::Idle,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Buffers dropped because the capture worker fell behind.
    pub fn dropped_buffers(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start capturing and invoke `on_sample` for every buffer.
    ///
    /// Must be called from within a tokio runtime. Only valid from `Idle`.
    pub fn start(&mut self, on_sample: SampleCallback) -> Result<(), AudioError> {
        if self.state != CaptureState::Idle {
            return Err(AudioError::InvalidState(format!(
                "cannot start capture from state {}",
                self.state
            )));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AudioError::InvalidState(format!("no tokio runtime: {}", e)))?;

        let (tx, mut rx) = mpsc::channel::<SampleBuffer>(SAMPLE_CHANNEL_CAPACITY);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let worker = runtime.spawn(async move {
            while let Some(buffer) = rx.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                on_sample(buffer).await;
            }
            tracing::debug!("Capture worker finished");
        });

        let running = self.running.clone();
        let dropped = self.dropped.clone();
        let sink: SampleSink = Box::new(move |buffer| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(buffer) {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Capture worker is behind, dropping sample buffer");
            }
        });

        if let Err(e) = self.device.start(sink) {
            self.running.store(false, Ordering::SeqCst);
            worker.abort();
            self.state = CaptureState::Stopped;
            return Err(e);
        }

        self.worker = Some(worker);
        self.state = CaptureState::Running;
        tracing::info!("Microphone capture started ({})", PcmFormat::REALTIME);
        Ok(())
    }

    /// Stop capturing. Idempotent.
    ///
    /// No callback invocation begins after this returns; one already running
    /// is allowed to finish.
    pub fn stop(&mut self) {
        if self.state == CaptureState::Stopped {
            return;
        }

        self.running.store(false, Ordering::SeqCst);
        self.device.stop();
        // The worker exits on its own once the device drops the channel sender
        self.worker.take();
        if self.state == CaptureState::Running {
            tracing::info!("Microphone capture stopped");
        }
        self.state = CaptureState::Stopped;
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Capture Manager
// =============================================================================

/// Identifies one capture started through a [`CaptureManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureTicket(u64);

impl fmt::Display for CaptureTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture-{}", self.0)
    }
}

struct ActiveCapture {
    ticket: CaptureTicket,
    source: MicrophoneSource,
}

/// Owner of the single running capture source.
///
/// Starting a capture while another one is running stops the previous one
/// first (last session wins). Concurrent multi-session capture is not
/// supported; share one manager across sessions.
pub struct CaptureManager {
    backend: Arc<dyn CaptureBackend>,
    active: Mutex<Option<ActiveCapture>>,
    next_ticket: AtomicU64,
}

impl CaptureManager {
    /// Create a manager over a capture backend.
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(None),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Open a new source and start it, stopping any running one first.
    pub fn start(&self, on_sample: SampleCallback) -> Result<CaptureTicket, AudioError> {
        let mut active = self.active.lock();

        if let Some(mut previous) = active.take() {
            tracing::info!(
                "Stopping {} to start a new capture; only one capture may run at a time",
                previous.ticket
            );
            previous.source.stop();
        }

        let mut source = MicrophoneSource::open(self.backend.as_ref())?;
        source.start(on_sample)?;

        let ticket = CaptureTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        *active = Some(ActiveCapture { ticket, source });
        Ok(ticket)
    }

    /// Stop the capture identified by `ticket`.
    ///
    /// Returns false when that capture is no longer the active one.
    pub fn stop(&self, ticket: CaptureTicket) -> bool {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) if current.ticket == ticket => {
                if let Some(mut current) = active.take() {
                    current.source.stop();
                }
                true
            }
            _ => false,
        }
    }

    /// Stop whatever capture is running.
    pub fn stop_all(&self) {
        if let Some(mut current) = self.active.lock().take() {
            current.source.stop();
        }
    }

    /// Ticket of the running capture, if any.
    pub fn active_ticket(&self) -> Option<CaptureTicket> {
        self.active.lock().as_ref().map(|current| current.ticket)
    }

    /// Whether a capture is running.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl fmt::Debug for CaptureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureManager")
            .field("active", &self.active_ticket())
            .finish()
    }
}

// =============================================================================
// Push Backend
// =============================================================================

/// Capture backend fed programmatically with [`PushCaptureBackend::push`].
///
/// Useful for streaming audio from files or other pipelines, and for tests.
pub struct PushCaptureBackend {
    format: PcmFormat,
    available: bool,
    sink: Arc<Mutex<Option<SampleSink>>>,
    opened: AtomicU64,
}

impl PushCaptureBackend {
    /// A backend delivering PCM16 mono 24kHz buffers.
    pub fn new() -> Self {
        Self::with_format(PcmFormat::REALTIME)
    }

    /// A backend whose device reports `format`.
    pub fn with_format(format: PcmFormat) -> Self {
        Self {
            format,
            available: true,
            sink: Arc::new(Mutex::new(None)),
            opened: AtomicU64::new(0),
        }
    }

    /// A backend with no device behind it; every `open` fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Deliver a buffer as if the device captured it.
    ///
    /// Returns false when no device is running.
    pub fn push(&self, buffer: SampleBuffer) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => {
                sink(buffer);
                true
            }
            None => false,
        }
    }

    /// Whether a device opened from this backend is running.
    pub fn is_running(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Number of devices opened so far.
    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

impl Default for PushCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for PushCaptureBackend {
    fn open(&self) -> Result<Box<dyn CaptureDevice>, AudioError> {
        if !self.available {
            return Err(AudioError::DeviceNotFound(
                "no capture device attached to push backend".to_string(),
            ));
        }
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(PushCaptureDevice {
            format: self.format,
            shared: self.sink.clone(),
            started: false,
        }))
    }
}

struct PushCaptureDevice {
    format: PcmFormat,
    shared: Arc<Mutex<Option<SampleSink>>>,
    started: bool,
}

impl CaptureDevice for PushCaptureDevice {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError> {
        *self.shared.lock() = Some(sink);
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.started {
            self.shared.lock().take();
            self.started = false;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn counting_callback() -> (SampleCallback, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let callback: SampleCallback = Arc::new(move |_buffer| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (callback, count)
    }

    async fn wait_for(count: &AtomicU64, expected: u64) {
        for _ in 0..200 {
            if count.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} callbacks, saw {}",
            expected,
            count.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_open_fails_without_device() {
        let backend = PushCaptureBackend::unavailable();
        match MicrophoneSource::open(&backend) {
            Err(AudioError::DeviceNotFound(_)) => {}
            _ => panic!("Expected DeviceNotFound error"),
        }
    }

    #[test]
    fn test_open_rejects_wrong_format() {
        let backend = PushCaptureBackend::with_format(PcmFormat {
            sample_rate: 48000,
            channels: 2,
            bits_per_sample: 16,
        });
        match MicrophoneSource::open(&backend) {
            Err(AudioError::UnsupportedFormat(msg)) => assert!(msg.contains("48000")),
            _ => panic!("Expected UnsupportedFormat error"),
        }
    }

    #[tokio::test]
    async fn test_source_delivers_buffers() {
        let backend = PushCaptureBackend::new();
        let mut source = MicrophoneSource::open(&backend).unwrap();
        assert_eq!(source.state(), CaptureState::Idle);
        assert!(!backend.push(SampleBuffer::from_i16(&[1, 2])));

        let (callback, count) = counting_callback();
        source.start(callback).unwrap();
        assert_eq!(source.state(), CaptureState::Running);

        for _ in 0..3 {
            assert!(backend.push(SampleBuffer::from_i16(&[1, 2, 3])));
        }
        wait_for(&count, 3).await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        let backend = PushCaptureBackend::new();
        let mut source = MicrophoneSource::open(&backend).unwrap();
        let (callback, count) = counting_callback();
        source.start(callback.clone()).unwrap();

        source.stop();
        source.stop();
        assert_eq!(source.state(), CaptureState::Stopped);
        assert!(!backend.is_running());
        assert!(!backend.push(SampleBuffer::from_i16(&[1])));

        match source.start(callback) {
            Err(AudioError::InvalidState(_)) => {}
            _ => panic!("Expected InvalidState error"),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_newest() {
        let backend = PushCaptureBackend::new();
        let mut source = MicrophoneSource::open(&backend).unwrap();

        let release = Arc::new(tokio::sync::Notify::new());
        let gate = release.clone();
        let callback: SampleCallback = Arc::new(move |_buffer| {
            let gate = gate.clone();
            Box::pin(async move {
                gate.notified().await;
            })
        });
        source.start(callback).unwrap();

        // Let the worker pick up the first buffer and park in the callback
        backend.push(SampleBuffer::from_i16(&[0]));
        tokio::time::sleep(Duration::from_millis(20)).await;

        for _ in 0..SAMPLE_CHANNEL_CAPACITY + 5 {
            backend.push(SampleBuffer::from_i16(&[0]));
        }
        assert_eq!(source.dropped_buffers(), 5);

        source.stop();
        release.notify_waiters();
    }

    #[tokio::test]
    async fn test_manager_last_start_wins() {
        let backend = Arc::new(PushCaptureBackend::new());
        let manager = CaptureManager::new(backend.clone());

        let (first_cb, first_count) = counting_callback();
        let first = manager.start(first_cb).unwrap();
        let (second_cb, second_count) = counting_callback();
        let second = manager.start(second_cb).unwrap();

        assert_ne!(first, second);
        assert_eq!(manager.active_ticket(), Some(second));
        assert_eq!(backend.open_count(), 2);

        backend.push(SampleBuffer::from_i16(&[5, 6]));
        wait_for(&second_count, 1).await;
        assert_eq!(first_count.load(Ordering::SeqCst), 0);

        // A stale ticket must not stop the newer capture
        assert!(!manager.stop(first));
        assert!(manager.is_active());

        assert!(manager.stop(second));
        assert!(!manager.is_active());
        assert!(!backend.is_running());
    }

    #[tokio::test]
    async fn test_manager_propagates_setup_error() {
        let manager = CaptureManager::new(Arc::new(PushCaptureBackend::unavailable()));
        let (callback, _count) = counting_callback();
        assert!(manager.start(callback).is_err());
        assert!(!manager.is_active());
    }
}
