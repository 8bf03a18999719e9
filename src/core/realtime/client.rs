//! Session factory.
//!
//! [`RealtimeClient`] opens a connection with the configured credentials and
//! walks a new [`RealtimeSession`] through startup:
//!
//! 1. open the connection (`<url>?model=<model>`, bearer auth)
//! 2. send `session.update`
//! 3. if the agent speaks first, send `response.create` right away
//! 4. start microphone streaming
//! 5. start the receive loop
//!
//! A capture setup failure tears the session down and is returned to the
//! caller; nothing is retried.

use std::sync::Arc;

use super::base::{RealtimeError, RealtimeResult};
use super::config::{FirstSpeaker, OPENAI_BETA_HEADER_VALUE};
use super::messages::SessionConfig;
use super::session::RealtimeSession;
use super::transport::{ConnectRequest, Transport, WebSocketTransport};
use crate::config::ClientConfig;
use crate::core::audio::AudioIo;

/// Creates realtime sessions.
pub struct RealtimeClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// A client connecting over WebSocket.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(WebSocketTransport::new()))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Endpoint and headers for a new connection.
    pub fn connect_request(&self) -> ConnectRequest {
        let separator = if self.config.url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}model={}",
            self.config.url,
            separator,
            self.config.model.as_str()
        );

        ConnectRequest::new(url)
            .with_header("Authorization", format!("Bearer {}", self.config.api_key))
            .with_header("OpenAI-Beta", OPENAI_BETA_HEADER_VALUE)
    }

    /// Start a session using the configured session settings.
    pub async fn start_default_session(&self, audio: AudioIo) -> RealtimeResult<RealtimeSession> {
        self.start_session(
            self.config.session_config(),
            self.config.session.first_speaker,
            audio,
        )
        .await
    }

    /// Open a connection and start a fully running session.
    ///
    /// # Errors
    /// - `AuthenticationFailed` when no API key is configured or the server
    ///   rejects it
    /// - `ConnectionFailed` when the connection cannot be opened
    /// - `Transport` when the handshake messages cannot be sent
    /// - `AudioSetup` when microphone capture cannot be started
    pub async fn start_session(
        &self,
        configuration: SessionConfig,
        first_speaker: FirstSpeaker,
        audio: AudioIo,
    ) -> RealtimeResult<RealtimeSession> {
        if self.config.api_key.trim().is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        tracing::info!(
            "Starting realtime session (model: {}, first speaker: {})",
            self.config.model,
            first_speaker
        );

        let connection = self.transport.open(self.connect_request()).await?;
        let session = RealtimeSession::new(connection, audio);

        if let Err(e) = Self::bring_up(&session, configuration, first_speaker).await {
            tracing::error!("Realtime session setup failed: {}", e);
            session.disconnect();
            return Err(e);
        }

        session.spawn_receive_loop();
        Ok(session)
    }

    async fn bring_up(
        session: &RealtimeSession,
        configuration: SessionConfig,
        first_speaker: FirstSpeaker,
    ) -> RealtimeResult<()> {
        session.connect(configuration).await?;

        // Not gated on the handshake; the server queues it behind session.update
        if first_speaker == FirstSpeaker::Agent {
            session.create_response(None).await?;
        }

        session.start_sending_audio()
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.config.url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}
