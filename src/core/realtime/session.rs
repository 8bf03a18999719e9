//! Realtime session engine.
//!
//! A [`RealtimeSession`] owns one open connection and drives the protocol:
//!
//! - `connect` activates the connection and sends `session.update`
//! - captured audio becomes `input_audio_buffer.append`, but only once the
//!   server has acknowledged the session with `session.updated`
//! - the receive loop dispatches inbound events in delivery order: audio
//!   deltas go to playback, `speech_started` flushes playback, `error` ends
//!   the session
//! - `disconnect` tears everything down exactly once
//!
//! # Concurrency
//!
//! All outbound traffic goes through one channel to a writer task that owns
//! the sink. Session flags live behind a single mutex that is never held
//! across an await point. The capture callback holds only a weak reference to
//! the session, so a dropped session stops sending audio.

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::base::{RealtimeError, RealtimeResult, SessionPhase, SessionState, TransportError};
use super::messages::{ClientEvent, ConversationItem, ResponseConfig, ServerEvent, SessionConfig};
use super::transport::{Connection, MessageSink, MessageStream, WireMessage};
use crate::core::audio::{
    AudioIo, CaptureManager, CaptureTicket, PlaybackSink, SampleBuffer, SampleCallback, codec,
};

/// Channel capacity for outbound messages waiting for the writer task.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct SessionCounters {
    audio_frames_sent: AtomicU64,
    audio_frames_failed: AtomicU64,
    audio_dropped_before_ack: AtomicU64,
    audio_dropped_after_termination: AtomicU64,
    audio_buffers_skipped: AtomicU64,
    audio_deltas_received: AtomicU64,
    interruptions: AtomicU64,
    protocol_errors: AtomicU64,
}

impl SessionCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_frames_failed: self.audio_frames_failed.load(Ordering::Relaxed),
            audio_dropped_before_ack: self.audio_dropped_before_ack.load(Ordering::Relaxed),
            audio_dropped_after_termination: self
                .audio_dropped_after_termination
                .load(Ordering::Relaxed),
            audio_buffers_skipped: self.audio_buffers_skipped.load(Ordering::Relaxed),
            audio_deltas_received: self.audio_deltas_received.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// `input_audio_buffer.append` frames written to the connection
    pub audio_frames_sent: u64,
    /// Append frames the connection refused
    pub audio_frames_failed: u64,
    /// Captured buffers dropped while waiting for `session.updated`
    pub audio_dropped_before_ack: u64,
    /// Captured buffers that arrived after disconnect
    pub audio_dropped_after_termination: u64,
    /// Captured buffers the codec could not encode
    pub audio_buffers_skipped: u64,
    /// `response.audio.delta` events handed to playback
    pub audio_deltas_received: u64,
    /// Barge-in interruptions
    pub interruptions: u64,
    /// Inbound messages dropped as malformed
    pub protocol_errors: u64,
}

// =============================================================================
// Session
// =============================================================================

struct OutboundFrame {
    message: WireMessage,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

struct SessionInner {
    state: Mutex<SessionState>,
    /// Held until `connect` hands it to the writer task
    sink: Mutex<Option<Box<dyn MessageSink>>>,
    /// Held until the receive loop takes it
    stream: Mutex<Option<Box<dyn MessageStream>>>,
    outbound: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    cancel: CancellationToken,
    playback: Arc<dyn PlaybackSink>,
    capture: Arc<CaptureManager>,
    capture_ticket: Mutex<Option<CaptureTicket>>,
    session_id: Mutex<Option<String>>,
    counters: SessionCounters,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(ticket) = self.capture_ticket.get_mut().take() {
            self.capture.stop(ticket);
        }
    }
}

/// One realtime conversation over one connection.
///
/// Cloning is cheap; clones drive the same session.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<SessionInner>,
}

impl RealtimeSession {
    /// Wrap an open connection. Nothing is sent until [`connect`](Self::connect).
    pub fn new(connection: Connection, audio: AudioIo) -> Self {
        let Connection { sink, stream } = connection;
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState::default()),
                sink: Mutex::new(Some(sink)),
                stream: Mutex::new(Some(stream)),
                outbound: Mutex::new(None),
                cancel: CancellationToken::new(),
                playback: audio.playback,
                capture: audio.capture,
                capture_ticket: Mutex::new(None),
                session_id: Mutex::new(None),
                counters: SessionCounters::default(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Snapshot of the session flags.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    /// Server-assigned id from `session.created`, once seen.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }

    /// Resolves once the session has been disconnected.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Activate the connection and send `session.update`.
    ///
    /// Does not wait for the server to acknowledge. Calling it again only
    /// sends another `session.update`.
    pub async fn connect(&self, configuration: SessionConfig) -> RealtimeResult<()> {
        self.activate()?;
        self.send(&ClientEvent::SessionUpdate {
            session: configuration,
        })
        .await?;
        tracing::info!("Session configuration sent, waiting for acknowledgment");
        Ok(())
    }

    fn activate(&self) -> RealtimeResult<()> {
        let mut state = self.inner.state.lock();
        if state.terminated {
            return Err(RealtimeError::NotConnected);
        }
        if state.connected {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            RealtimeError::ConnectionFailed(format!("no tokio runtime: {}", e))
        })?;
        let sink = self.inner.sink.lock().take().ok_or(RealtimeError::NotConnected)?;

        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        runtime.spawn(run_writer(sink, rx, self.inner.cancel.clone()));
        *self.inner.outbound.lock() = Some(tx);
        state.connected = true;
        Ok(())
    }

    /// Serialize and transmit one event.
    ///
    /// Concurrent sends are written one at a time in the order they reach the
    /// writer task.
    pub async fn send(&self, event: &ClientEvent) -> RealtimeResult<()> {
        let tx = {
            let state = self.inner.state.lock();
            if !state.connected || state.terminated {
                return Err(RealtimeError::NotConnected);
            }
            self.inner
                .outbound
                .lock()
                .clone()
                .ok_or(RealtimeError::NotConnected)?
        };

        let json = event.to_json()?;
        tracing::trace!("Sending {}", event.event_type());

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(OutboundFrame {
            message: WireMessage::Text(json),
            ack: ack_tx,
        })
        .await
        .map_err(|_| RealtimeError::NotConnected)?;

        match ack_rx.await {
            Ok(result) => result.map_err(RealtimeError::from),
            // Writer stopped before writing the frame
            Err(_) => Err(RealtimeError::NotConnected),
        }
    }

    /// Add a user text turn to the conversation.
    pub async fn send_text(&self, text: impl Into<String>) -> RealtimeResult<()> {
        self.send(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })
        .await
    }

    /// Ask the agent to respond now.
    pub async fn create_response(&self, response: Option<ResponseConfig>) -> RealtimeResult<()> {
        self.send(&ClientEvent::ResponseCreate { response }).await
    }

    // -------------------------------------------------------------------------
    // Audio
    // -------------------------------------------------------------------------

    /// Start microphone capture and stream it to the server.
    ///
    /// Any capture started earlier through the same [`CaptureManager`] is
    /// stopped first. Buffers captured before `session.updated` are dropped.
    pub fn start_sending_audio(&self) -> RealtimeResult<()> {
        if self.is_terminated() {
            return Err(RealtimeError::NotConnected);
        }

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let on_sample: SampleCallback = Arc::new(move |buffer| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    RealtimeSession { inner }.send_captured(buffer).await;
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let ticket = self.inner.capture.start(on_sample)?;
        *self.inner.capture_ticket.lock() = Some(ticket);

        // Lost a race with disconnect
        if self.is_terminated() {
            self.stop_capture();
            return Err(RealtimeError::NotConnected);
        }

        tracing::info!("Streaming microphone audio ({})", ticket);
        Ok(())
    }

    async fn send_captured(&self, buffer: SampleBuffer) {
        let counters = &self.inner.counters;
        let state = self.state();

        if state.terminated {
            SessionCounters::bump(&counters.audio_dropped_after_termination);
            self.stop_capture();
            return;
        }
        if !state.handshake_acknowledged {
            SessionCounters::bump(&counters.audio_dropped_before_ack);
            tracing::trace!("Dropping captured audio, session not acknowledged yet");
            return;
        }

        let Some(audio) = codec::encode(&buffer) else {
            SessionCounters::bump(&counters.audio_buffers_skipped);
            return;
        };

        match self.send(&ClientEvent::InputAudioBufferAppend { audio }).await {
            Ok(()) => SessionCounters::bump(&counters.audio_frames_sent),
            Err(e) => {
                SessionCounters::bump(&counters.audio_frames_failed);
                tracing::warn!("Failed to send audio frame: {}", e);
            }
        }
    }

    fn stop_capture(&self) {
        if let Some(ticket) = self.inner.capture_ticket.lock().take() {
            self.inner.capture.stop(ticket);
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Receive and dispatch messages until the session ends.
    ///
    /// Only one receive loop runs per session; later calls return at once.
    pub async fn run_receive_loop(&self) {
        let Some(mut stream) = self.inner.stream.lock().take() else {
            tracing::warn!("Receive loop already started for this session");
            return;
        };

        loop {
            let received = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => {
                    tracing::debug!("Receive loop cancelled");
                    break;
                }
                received = stream.receive_one() => received,
            };

            match received {
                Ok(WireMessage::Text(text)) => {
                    if self.dispatch_text(&text).is_break() {
                        break;
                    }
                }
                Ok(WireMessage::Binary(data)) => {
                    tracing::warn!("Ignoring binary message ({} bytes)", data.len());
                }
                Err(e) if e.is_peer_disconnect() => {
                    tracing::info!("Connection ended by server ({}), disconnecting", e);
                    self.disconnect();
                    break;
                }
                Err(e) => {
                    tracing::error!("Receive failed, stopping receive loop: {}", e);
                    break;
                }
            }
        }

        tracing::debug!("Receive loop finished");
    }

    /// Run the receive loop on its own task.
    pub fn spawn_receive_loop(&self) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move { session.run_receive_loop().await })
    }

    fn dispatch_text(&self, text: &str) -> ControlFlow<()> {
        match ServerEvent::parse(text) {
            Ok(event) => self.dispatch(event),
            Err(e) => {
                SessionCounters::bump(&self.inner.counters.protocol_errors);
                tracing::warn!("Dropping inbound message: {}", e);
                ControlFlow::Continue(())
            }
        }
    }

    /// Act on one inbound event.
    ///
    /// Returns `Break` when the session has ended and no further events
    /// should be processed.
    pub fn dispatch(&self, event: ServerEvent) -> ControlFlow<()> {
        if self.is_terminated() {
            return ControlFlow::Break(());
        }

        match event {
            ServerEvent::AudioDelta { delta, .. } => {
                SessionCounters::bump(&self.inner.counters.audio_deltas_received);
                self.inner.playback.enqueue(&delta);
            }

            ServerEvent::SessionUpdated { .. } => {
                let acknowledged = {
                    let mut state = self.inner.state.lock();
                    let first = !state.handshake_acknowledged;
                    state.handshake_acknowledged = true;
                    first
                };
                if acknowledged {
                    tracing::info!("Session acknowledged, audio streaming enabled");
                }
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                SessionCounters::bump(&self.inner.counters.interruptions);
                tracing::debug!("User started speaking at {:?}ms, interrupting playback", audio_start_ms);
                self.inner.playback.interrupt_and_flush();
            }

            ServerEvent::Error { error } => {
                let error = RealtimeError::ServerReported(
                    error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unspecified error".to_string()),
                );
                tracing::error!("{}", error);
                self.disconnect();
                return ControlFlow::Break(());
            }

            ServerEvent::SessionCreated { session } => {
                let id = session.and_then(|s| s.id);
                tracing::info!("Session created: {}", id.as_deref().unwrap_or("<no id>"));
                *self.inner.session_id.lock() = id;
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                tracing::debug!("User stopped speaking at {:?}ms", audio_end_ms);
            }

            ServerEvent::ResponseDone { .. } => {
                tracing::debug!("Response done");
            }

            ServerEvent::Unknown => {
                tracing::trace!("Unhandled server event");
            }
        }

        ControlFlow::Continue(())
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// End the session. Idempotent and safe to call from any context.
    ///
    /// Closes the connection, stops capture and interrupts playback.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.connected = false;
        }

        self.inner.cancel.cancel();
        self.inner.outbound.lock().take();

        // Never activated: close the sink here instead of in the writer
        if let Some(mut sink) = self.inner.sink.lock().take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = sink.close().await {
                        tracing::debug!("Error closing unused connection: {}", e);
                    }
                });
            }
        }

        self.stop_capture();
        self.inner.playback.interrupt_and_flush();
        tracing::info!("Realtime session disconnected");
    }
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("phase", &self.phase())
            .field("session_id", &self.session_id())
            .finish()
    }
}

/// Owns the sink: writes queued frames one at a time, closes on cancellation.
async fn run_writer(
    mut sink: Box<dyn MessageSink>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    let result = sink.send(frame.message).await;
                    if let Err(e) = &result {
                        tracing::debug!("Write failed: {}", e);
                    }
                    let _ = frame.ack.send(result);
                }
                None => break,
            },
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("Error closing connection: {}", e);
    }
    tracing::debug!("Writer task finished");
}

// =============================================================================
// Tests
// =============================================================================
