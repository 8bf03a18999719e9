//! Message connection abstraction and its WebSocket implementation.
//!
//! A [`Transport`] opens a persistent bidirectional message connection and
//! hands it back split into a [`MessageSink`] and a [`MessageStream`]. The
//! session engine owns both halves for the rest of the session.

use std::io::ErrorKind;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::base::{RealtimeError, RealtimeResult, TransportError};

/// One message on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

/// Where to connect and which headers to send with the upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header to the request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outbound half of a connection.
#[async_trait]
pub trait MessageSink: Send {
    /// Transmit one message.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Close the connection. Closing an already closed connection succeeds.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a connection.
#[async_trait]
pub trait MessageStream: Send {
    /// Wait for the next message.
    ///
    /// Returns [`TransportError::Closed`] once the connection is closed and
    /// [`TransportError::PeerReset`] when the peer dropped it abruptly.
    async fn receive_one(&mut self) -> Result<WireMessage, TransportError>;
}

/// An open connection, split into its two halves.
pub struct Connection {
    pub sink: Box<dyn MessageSink>,
    pub stream: Box<dyn MessageStream>,
}

impl Connection {
    pub fn new(sink: Box<dyn MessageSink>, stream: Box<dyn MessageStream>) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens message connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: ConnectRequest) -> RealtimeResult<Connection>;
}

// =============================================================================
// WebSocket
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over `tokio-tungstenite` (ws:// and wss://).
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }

    fn build_request(request: &ConnectRequest) -> RealtimeResult<http::Request<()>> {
        let uri: http::Uri = request
            .url
            .parse()
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid URL {}: {}", request.url, e)))?;
        let host = match (uri.host(), uri.port_u16()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "URL has no host: {}",
                    request.url
                )));
            }
        };

        let mut builder = http::Request::builder()
            .uri(uri)
            .header("Host", host)
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .body(())
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: ConnectRequest) -> RealtimeResult<Connection> {
        let http_request = Self::build_request(&request)?;

        let (ws_stream, response) = tokio_tungstenite::connect_async(http_request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response)
                    if response.status() == http::StatusCode::UNAUTHORIZED =>
                {
                    RealtimeError::AuthenticationFailed(format!(
                        "server rejected credentials ({})",
                        response.status()
                    ))
                }
                other => RealtimeError::ConnectionFailed(other.to_string()),
            })?;

        tracing::info!("Connected to {} ({})", request.url, response.status());

        let (sink, stream) = ws_stream.split();
        Ok(Connection::new(
            Box::new(WebSocketSink { inner: sink }),
            Box::new(WebSocketMessageStream { inner: stream }),
        ))
    }
}

fn classify(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::PeerReset
        }
        tungstenite::Error::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            ) =>
        {
            TransportError::PeerReset
        }
        tungstenite::Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::WebSocket(other.to_string()),
    }
}

struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let message = match message {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Binary(data) => Message::Binary(data),
        };
        self.inner.send(message).await.map_err(classify)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) => Ok(()),
            Err(e) => match classify(e) {
                TransportError::Closed | TransportError::PeerReset => Ok(()),
                other => Err(other),
            },
        }
    }
}

struct WebSocketMessageStream {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl MessageStream for WebSocketMessageStream {
    async fn receive_one(&mut self) -> Result<WireMessage, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(WireMessage::Text(text.as_str().to_string())),
                Some(Ok(Message::Binary(data))) => return Ok(WireMessage::Binary(data)),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("Close frame received: {:?}", frame);
                    return Err(TransportError::Closed);
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(classify(e)),
                None => return Err(TransportError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_headers() {
        let request = ConnectRequest::new("wss://example.com/v1/realtime?model=m")
            .with_header("Authorization", "Bearer sk-test")
            .with_header("OpenAI-Beta", "realtime=v1");

        assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
        assert_eq!(request.header("OPENAI-BETA"), Some("realtime=v1"));
        assert_eq!(request.header("X-Missing"), None);
    }

    #[test]
    fn test_build_request() {
        let request = ConnectRequest::new("ws://127.0.0.1:9001/v1/realtime?model=m")
            .with_header("Authorization", "Bearer sk-test");
        let http_request = WebSocketTransport::build_request(&request).unwrap();

        assert_eq!(http_request.headers()["Host"], "127.0.0.1:9001");
        assert_eq!(http_request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(http_request.uri().query(), Some("model=m"));
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        let request = ConnectRequest::new("not a url");
        assert!(matches!(
            WebSocketTransport::build_request(&request),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_classify_errors() {
        assert_eq!(classify(tungstenite::Error::ConnectionClosed), TransportError::Closed);
        assert_eq!(
            classify(tungstenite::Error::Protocol(
                ProtocolError::ResetWithoutClosingHandshake
            )),
            TransportError::PeerReset
        );
        assert_eq!(
            classify(tungstenite::Error::Io(std::io::Error::from(ErrorKind::ConnectionReset))),
            TransportError::PeerReset
        );
        assert!(matches!(
            classify(tungstenite::Error::Io(std::io::Error::from(ErrorKind::TimedOut))),
            TransportError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_open_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocketTransport::new()
            .open(ConnectRequest::new(format!("ws://{}/v1/realtime", addr)))
            .await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
    }
}
