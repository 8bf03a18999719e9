//! WebSocket Mock Realtime Server
//!
//! Speaks enough of the realtime protocol to drive a client session:
//! - rejects the upgrade with 401 unless the expected bearer token is sent
//! - sends `session.created` on connect
//! - answers `session.update` with `session.updated` when auto-ack is on
//! - forwards every client event to the test and sends whatever the test scripts

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Upgrade request as the server saw it
#[derive(Debug, Clone, Default)]
pub struct RecordedRequest {
    pub path_and_query: String,
    pub authorization: Option<String>,
    pub openai_beta: Option<String>,
}

/// Scripted server behaviour for one connection
#[derive(Debug)]
pub enum ServerAction {
    /// Send a JSON event
    Send(Value),
    /// Send a raw text frame
    SendRaw(String),
    /// Send a close frame
    Close,
    /// Drop the TCP connection without a close handshake
    Drop,
}

/// One accepted client connection
pub struct MockConnection {
    pub request: RecordedRequest,
    inbound: mpsc::UnboundedReceiver<Value>,
    actions: mpsc::UnboundedSender<ServerAction>,
}

impl MockConnection {
    /// Next client event, or `None` after two seconds or once the connection ended
    pub async fn next_event(&mut self) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(2), self.inbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next client event of the given type, skipping everything else
    pub async fn next_event_of(&mut self, event_type: &str) -> Option<Value> {
        loop {
            let event = self.next_event().await?;
            if event["type"] == event_type {
                return Some(event);
            }
        }
    }

    /// Whether a client event arrives within `wait`
    pub async fn is_quiet_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.inbound.recv()).await.is_err()
    }

    /// Wait until the client has hung up
    pub async fn wait_closed(&mut self) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.inbound.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }

    pub fn send(&self, event: Value) {
        let _ = self.actions.send(ServerAction::Send(event));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.actions.send(ServerAction::SendRaw(text.to_string()));
    }

    pub fn acknowledge(&self) {
        self.send(json!({ "type": "session.updated", "session": { "id": "sess_mock" } }));
    }

    pub fn close(&self) {
        let _ = self.actions.send(ServerAction::Close);
    }

    pub fn drop_connection(&self) {
        let _ = self.actions.send(ServerAction::Drop);
    }
}

/// Mock realtime endpoint on a random local port
pub struct MockRealtimeServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    rejected: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockRealtimeServer {
    /// Start a server that acknowledges `session.update` automatically
    pub async fn start(api_key: &str) -> Self {
        Self::start_with(api_key, true).await
    }

    pub async fn start_with(api_key: &str, auto_ack: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connections_tx, connections) = mpsc::unbounded_channel();
        let rejected = Arc::new(Mutex::new(Vec::new()));

        let expected = format!("Bearer {}", api_key);
        let rejected_log = rejected.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let connections_tx = connections_tx.clone();
                let expected = expected.clone();
                let rejected_log = rejected_log.clone();
                tokio::spawn(async move {
                    handle_connection(stream, expected, auto_ack, connections_tx, rejected_log)
                        .await;
                });
            }
        });

        Self {
            addr,
            connections,
            rejected,
        }
    }

    /// Endpoint URL for client configuration
    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    /// Next accepted connection
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(Duration::from_secs(2), self.connections.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }

    /// Upgrade requests refused for bad credentials
    pub fn rejected(&self) -> Vec<RecordedRequest> {
        self.rejected.lock().clone()
    }
}

async fn handle_connection(
    stream: TcpStream,
    expected_authorization: String,
    auto_ack: bool,
    connections: mpsc::UnboundedSender<MockConnection>,
    rejected: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let recorded = Arc::new(Mutex::new(RecordedRequest::default()));
    let recorded_in_callback = recorded.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let seen = RecordedRequest {
            path_and_query: request
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_default(),
            authorization: header("authorization"),
            openai_beta: header("openai-beta"),
        };
        let authorized = seen.authorization.as_deref() == Some(expected_authorization.as_str());
        *recorded_in_callback.lock() = seen;

        if authorized {
            Ok(response)
        } else {
            Err(http::Response::builder()
                .status(http::StatusCode::UNAUTHORIZED)
                .body(Some("invalid api key".to_string()))
                .unwrap())
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(_) => {
            rejected.lock().push(recorded.lock().clone());
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (actions, mut actions_rx) = mpsc::unbounded_channel();
    let request = recorded.lock().clone();
    if connections
        .send(MockConnection {
            request,
            inbound,
            actions,
        })
        .is_err()
    {
        return;
    }

    let created = json!({
        "type": "session.created",
        "session": { "id": "sess_mock", "model": "gpt-4o-realtime-preview-2024-12-17" }
    });
    if write
        .send(Message::Text(created.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            action = actions_rx.recv() => {
                let result = match action {
                    Some(ServerAction::Send(event)) => {
                        write.send(Message::Text(event.to_string().into())).await
                    }
                    Some(ServerAction::SendRaw(text)) => write.send(Message::Text(text.into())).await,
                    Some(ServerAction::Close) => write.send(Message::Close(None)).await,
                    Some(ServerAction::Drop) | None => break,
                };
                if result.is_err() {
                    break;
                }
            }
            incoming = read.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(event) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if auto_ack && event["type"] == "session.update" {
                    let ack = json!({ "type": "session.updated", "session": { "id": "sess_mock" } });
                    if write.send(Message::Text(ack.to_string().into())).await.is_err() {
                        break;
                    }
                }
                let _ = inbound_tx.send(event);
            }
        }
    }
}
