//! Error and state types shared by the realtime session engine and its
//! transports.

use std::fmt;

use thiserror::Error;

use crate::core::audio::AudioError;

// =============================================================================
// Error Types
// =============================================================================

/// Failures of the underlying message connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer dropped the connection without a closing handshake
    #[error("Connection reset by peer")]
    PeerReset,

    /// The connection was closed, by either side
    #[error("Connection closed")]
    Closed,

    /// WebSocket protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Socket-level I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the peer ended the connection.
    ///
    /// These end a session gracefully instead of being reported as failures.
    pub fn is_peer_disconnect(&self) -> bool {
        matches!(self, Self::PeerReset | Self::Closed)
    }
}

/// Errors that can occur while setting up or running a realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Opening the connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected the credentials
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid client or session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Sending or receiving on an open connection failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Capture could not be set up
    #[error("Audio setup failed: {0}")]
    AudioSetup(#[from] AudioError),

    /// An outbound event could not be serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An inbound message could not be interpreted
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server sent an `error` event
    #[error("Server error: {0}")]
    ServerReported(String),

    /// The session is not connected (never connected or already terminated)
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle flags of one session.
///
/// Audio is only sent while `handshake_acknowledged && !terminated`.
/// `terminated` never goes back to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// `connect` has activated the connection
    pub connected: bool,
    /// The server answered `session.update` with `session.updated`
    pub handshake_acknowledged: bool,
    /// The session has been disconnected
    pub terminated: bool,
}

impl SessionState {
    /// Whether captured audio may be transmitted.
    #[inline]
    pub fn accepts_audio(&self) -> bool {
        self.handshake_acknowledged && !self.terminated
    }

    /// Coarse lifecycle phase, for logs and status reporting.
    pub fn phase(&self) -> SessionPhase {
        if self.terminated {
            SessionPhase::Terminated
        } else if self.handshake_acknowledged {
            SessionPhase::Streaming
        } else if self.connected {
            SessionPhase::AwaitingAcknowledgment
        } else {
            SessionPhase::Idle
        }
    }
}

/// Coarse lifecycle phase derived from [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not connected yet
    Idle,
    /// `session.update` sent, waiting for `session.updated`
    AwaitingAcknowledgment,
    /// Handshake complete, audio flowing
    Streaming,
    /// Disconnected for good
    Terminated,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "Idle"),
            SessionPhase::AwaitingAcknowledgment => write!(f, "AwaitingAcknowledgment"),
            SessionPhase::Streaming => write!(f, "Streaming"),
            SessionPhase::Terminated => write!(f, "Terminated"),
        }
    }
}
