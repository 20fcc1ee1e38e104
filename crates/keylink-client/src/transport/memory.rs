//! In-memory transport for tests and simulations.
//!
//! Every successful [`MemoryConnector::connect`] queues a [`ServerEnd`] that
//! plays the daemon: it reads client frames and writes responses, broadcasts
//! and faults. By default the server end greets with a `connected` frame as
//! soon as the link opens, like the daemon does.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as link;
use futures::{SinkExt, StreamExt};
use keylink_proto::{
    BroadcastKind, ClientFrame, ErrorBody, FaultFrame, Handshake, RequestFrame, ResponseFrame,
    ServerFrame,
};
use parking_lot::Mutex as SyncMutex;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use super::{Connector, Inbound, Transport};
use crate::errors::ClientError;

/// Version announced by the default handshake.
pub const MEMORY_SERVER_VERSION: &str = "memory";

struct Listener {
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
    refuse: AtomicBool,
    auto_handshake: AtomicBool,
    version: SyncMutex<String>,
    attempts: AtomicU32,
}

/// Connector whose links terminate in [`ServerEnd`]s inside the process.
#[derive(Clone)]
pub struct MemoryConnector {
    listener: Arc<Listener>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

impl MemoryConnector {
    /// Create a connector that accepts connections and greets automatically.
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            listener: Arc::new(Listener {
                accepted_tx,
                accepted_rx: Mutex::new(accepted_rx),
                refuse: AtomicBool::new(false),
                auto_handshake: AtomicBool::new(true),
                version: SyncMutex::new(MEMORY_SERVER_VERSION.to_string()),
                attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Version string sent in subsequent automatic handshakes.
    pub fn set_version(&self, version: impl Into<String>) {
        *self.listener.version.lock() = version.into();
    }

    /// Fail subsequent connect attempts with a transport error.
    pub fn refuse_connections(&self, refuse: bool) {
        self.listener.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Whether new links are greeted with a `connected` frame.
    pub fn set_auto_handshake(&self, enabled: bool) {
        self.listener.auto_handshake.store(enabled, Ordering::SeqCst);
    }

    /// Connect attempts made so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.listener.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted link.
    pub async fn accept(&self) -> Option<ServerEnd> {
        self.listener.accepted_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Transport, ClientError> {
        let _ = self.listener.attempts.fetch_add(1, Ordering::SeqCst);
        if self.listener.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(format!("connection refused: {url}")));
        }

        let (client_tx, server_rx) = link::unbounded::<String>();
        let (server_tx, client_rx) = link::unbounded::<Result<Inbound, ClientError>>();
        let end = ServerEnd {
            to_client: server_tx,
            from_client: server_rx,
        };
        if self.listener.auto_handshake.load(Ordering::SeqCst) {
            let version = self.listener.version.lock().clone();
            end.send(&ServerFrame::Connected(Handshake {
                version,
                timestamp: 0,
            }));
        }
        self.listener
            .accepted_tx
            .send(end)
            .map_err(|_| ClientError::Transport("listener closed".into()))?;

        Ok(Transport {
            sink: Box::pin(client_tx.sink_map_err(|_| ClientError::ConnectionLost)),
            stream: Box::pin(client_rx),
        })
    }
}

/// Daemon side of one in-memory link.
#[derive(Debug)]
pub struct ServerEnd {
    to_client: link::UnboundedSender<Result<Inbound, ClientError>>,
    from_client: link::UnboundedReceiver<String>,
}

impl ServerEnd {
    /// Next frame sent by the client, or `None` once the client closed the link.
    ///
    /// Text that does not parse as a client frame is logged and skipped.
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        loop {
            let text = self.from_client.next().await?;
            match ClientFrame::parse(&text) {
                Ok(frame) => return Some(frame),
                Err(e) => warn!(error = %e, "memory server skipping unparseable client frame"),
            }
        }
    }

    /// Next `command` or `query`, acknowledging channel announcements on the way.
    pub async fn next_request(&mut self) -> Option<RequestFrame> {
        loop {
            match self.next_frame().await? {
                ClientFrame::Command(req) | ClientFrame::Query(req) => return Some(req),
                ClientFrame::Subscribe(ch) => {
                    self.respond(ch.id, json!({"subscribed": true, "channel": ch.channel}));
                }
                ClientFrame::Unsubscribe(ch) => {
                    self.respond(ch.id, json!({"unsubscribed": true, "channel": ch.channel}));
                }
            }
        }
    }

    /// Answer a request successfully.
    pub fn respond(&self, id: impl Into<keylink_proto::CorrelationId>, result: Value) {
        self.send(&ServerFrame::Response(ResponseFrame::success(
            id.into(),
            result,
        )));
    }

    /// Answer a request with an error.
    pub fn reject(
        &self,
        id: impl Into<keylink_proto::CorrelationId>,
        kind: &str,
        message: &str,
    ) {
        self.send(&ServerFrame::Response(ResponseFrame::failure(
            id.into(),
            ErrorBody::new(kind, message),
        )));
    }

    /// Send a broadcast frame.
    pub fn broadcast(&self, kind: BroadcastKind, channel: &str, payload: Value, seq: u64) {
        self.send(&ServerFrame::broadcast(kind, channel, payload, seq));
    }

    /// Send a connection-scoped `error` frame.
    pub fn fault(&self, message: &str, code: Option<&str>) {
        self.send(&ServerFrame::Error(FaultFrame {
            message: message.to_string(),
            code: code.map(str::to_string),
        }));
    }

    /// Send any server frame.
    pub fn send(&self, frame: &ServerFrame) {
        match frame.to_json() {
            Ok(text) => self.send_text(text),
            Err(e) => warn!(error = %e, "memory server could not encode frame"),
        }
    }

    /// Send raw text, well-formed or not.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(Inbound::Text(text.into())));
    }

    /// Send a transport keepalive.
    pub fn heartbeat(&self) {
        let _ = self.to_client.unbounded_send(Ok(Inbound::Heartbeat));
    }

    /// Fail the link with a transport error, then close it.
    pub fn fail(self, message: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(ClientError::Transport(message.to_string())));
    }

    /// Close the link from the daemon side.
    pub fn hang_up(self) {
        drop(self);
    }

    /// Whether the client side has gone away.
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
