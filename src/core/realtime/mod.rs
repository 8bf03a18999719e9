//! Realtime voice sessions over the OpenAI Realtime protocol.
//!
//! # Architecture
//!
//! - [`Transport`] opens a message [`Connection`] (WebSocket or in-memory)
//! - [`RealtimeSession`] owns the connection and runs the protocol: handshake,
//!   gated microphone streaming, inbound dispatch and teardown
//! - [`RealtimeClient`] opens connections and brings sessions up
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz in both directions.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_realtime_client::config::ClientConfig;
//! use waav_realtime_client::core::audio::{AudioIo, CaptureManager, PcmPlaybackQueue};
//! use waav_realtime_client::core::realtime::{FirstSpeaker, RealtimeClient, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = RealtimeClient::websocket(ClientConfig::from_env().unwrap());
//!     let capture = Arc::new(CaptureManager::new(backend));
//!     let audio = AudioIo::new(capture, Arc::new(PcmPlaybackQueue::new()));
//!
//!     let session = client
//!         .start_session(
//!             SessionConfig::voice_conversation("You are a patient math tutor."),
//!             FirstSpeaker::Agent,
//!             audio,
//!         )
//!         .await
//!         .unwrap();
//!     session.closed().await;
//! }
//! ```

mod base;
mod client;
pub mod config;
pub mod memory;
pub mod messages;
mod session;
pub mod transport;

pub use base::{RealtimeError, RealtimeResult, SessionPhase, SessionState, TransportError};
pub use client::RealtimeClient;
pub use config::{
    FirstSpeaker, Modality, OPENAI_BETA_HEADER_VALUE, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use memory::{MemoryPeer, MemoryTransport};
pub use messages::{
    ApiError, ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, MaxTokens,
    ResponseConfig, ServerEvent, SessionConfig, SessionInfo, ToolDef, TurnDetection,
};
pub use session::{RealtimeSession, SessionStats};
pub use transport::{
    ConnectRequest, Connection, MessageSink, MessageStream, Transport, WebSocketTransport,
    WireMessage,
};
