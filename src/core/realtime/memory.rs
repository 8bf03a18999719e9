//! In-process connections.
//!
//! [`pair`] returns a [`Connection`] for the session together with a
//! [`MemoryPeer`] that plays the server: it sees every message the session
//! sends and injects inbound messages or transport failures.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::base::{RealtimeError, RealtimeResult, TransportError};
use super::transport::{
    ConnectRequest, Connection, MessageSink, MessageStream, Transport, WireMessage,
};

type Inbound = Result<WireMessage, TransportError>;

/// Create a connected pair.
pub fn pair() -> (Connection, MemoryPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let send_failure = Arc::new(Mutex::new(None));

    let connection = Connection::new(
        Box::new(MemorySink {
            tx: outbound_tx,
            closed: closed.clone(),
            send_failure: send_failure.clone(),
        }),
        Box::new(MemoryStream { rx: inbound_rx }),
    );
    let peer = MemoryPeer {
        outbound_rx,
        inbound_tx,
        closed,
        send_failure,
    };
    (connection, peer)
}

struct MemorySink {
    tx: mpsc::UnboundedSender<WireMessage>,
    closed: Arc<AtomicBool>,
    send_failure: Arc<Mutex<Option<TransportError>>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let Some(error) = self.send_failure.lock().clone() {
            return Err(error);
        }
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn receive_one(&mut self) -> Result<WireMessage, TransportError> {
        match self.rx.recv().await {
            Some(inbound) => inbound,
            None => Err(TransportError::Closed),
        }
    }
}

/// Server side of an in-process connection.
pub struct MemoryPeer {
    outbound_rx: mpsc::UnboundedReceiver<WireMessage>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    closed: Arc<AtomicBool>,
    send_failure: Arc<Mutex<Option<TransportError>>>,
}

impl MemoryPeer {
    /// Queue a message for the session. Returns `false` if the session's
    /// stream is gone.
    pub fn deliver(&self, message: WireMessage) -> bool {
        self.inbound_tx.send(Ok(message)).is_ok()
    }

    pub fn deliver_text(&self, text: impl Into<String>) -> bool {
        self.deliver(WireMessage::Text(text.into()))
    }

    pub fn deliver_json(&self, value: &serde_json::Value) -> bool {
        self.deliver_text(value.to_string())
    }

    /// Make the session's next receive fail with `error`.
    pub fn fail(&self, error: TransportError) -> bool {
        self.inbound_tx.send(Err(error)).is_ok()
    }

    /// Make every later send from the session fail with `error`.
    pub fn reject_sends(&self, error: TransportError) {
        *self.send_failure.lock() = Some(error);
    }

    /// Next message sent by the session, `None` once its sink is dropped.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.outbound_rx.recv().await
    }

    /// Next text message sent by the session, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.recv().await? {
                WireMessage::Text(text) => match serde_json::from_str(&text) {
                    Ok(value) => return Some(value),
                    Err(e) => tracing::warn!("Peer received non-JSON text: {}", e),
                },
                WireMessage::Binary(_) => continue,
            }
        }
    }

    /// Next message sent by the session, if one is already waiting.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.outbound_rx.try_recv().ok()
    }

    /// Whether the session closed its sink.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// [`Transport`] handing out pre-built in-process connections in order.
#[derive(Default)]
pub struct MemoryTransport {
    connections: Mutex<VecDeque<Connection>>,
    requests: Mutex<Vec<ConnectRequest>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport holding one connection, plus that connection's peer.
    pub fn with_peer() -> (Self, MemoryPeer) {
        let transport = Self::new();
        let peer = transport.add_peer();
        (transport, peer)
    }

    /// Queue another connection and return its peer.
    pub fn add_peer(&self) -> MemoryPeer {
        let (connection, peer) = pair();
        self.connections.lock().push_back(connection);
        peer
    }

    /// Every request passed to [`Transport::open`] so far.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, request: ConnectRequest) -> RealtimeResult<Connection> {
        tracing::debug!("Opening in-memory connection for {}", request.url);
        self.requests.lock().push(request);
        self.connections
            .lock()
            .pop_front()
            .ok_or_else(|| RealtimeError::ConnectionFailed("no in-memory connection queued".to_string()))
    }
}
