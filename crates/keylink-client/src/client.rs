//! Consumer-facing client handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keylink_proto::{BroadcastFrame, ClientFrame, Handshake};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::config::ClientConfig;
use crate::driver::{Driver, Op};
use crate::errors::{ClientError, Result};
use crate::history::ChannelHistory;
use crate::router::{Subscription, SubscriptionRouter};
use crate::state::{ConnectionEvent, ConnectionState, EVENT_CAPACITY, StateCell};
use crate::transport::{Connector, WebSocketConnector};

struct Shared {
    ops: mpsc::UnboundedSender<Op>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    router: Arc<SubscriptionRouter>,
    config: ClientConfig,
    handshake: Arc<RwLock<Option<Handshake>>>,
    pending: Arc<AtomicUsize>,
}

/// Handle to one daemon connection.
///
/// Cheap to clone; all clones share the connection. The connection task
/// shuts down once every clone has been dropped.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Open a connection through `connector` and wait for the handshake.
    ///
    /// Returns `Config` for a configuration that fails
    /// [`validate`](ClientConfig::validate), and the handshake or transport
    /// error if the first attempt fails; only connections that were once open
    /// are retried automatically.
    pub async fn connect(config: ClientConfig, connector: impl Connector) -> Result<Self> {
        config.validate()?;
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let cell = StateCell::new(events_tx.clone());
        let state = cell.subscribe();
        let router = SubscriptionRouter::new();
        let handshake = Arc::new(RwLock::new(None));
        let pending = Arc::new(AtomicUsize::new(0));

        if config.announce_subscriptions {
            // Weak so the router does not keep the connection task alive
            let ops = ops_tx.downgrade();
            router.set_listener(move |interest| {
                if let Some(ops) = ops.upgrade() {
                    let _ = ops.send(Op::Announce(interest));
                }
            });
        }

        let driver = Driver::new(
            config.clone(),
            Arc::new(connector),
            cell,
            ops_rx,
            Arc::clone(&router),
            Arc::clone(&handshake),
            Arc::clone(&pending),
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        let _task = tokio::spawn(driver.run(ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                shared: Arc::new(Shared {
                    ops: ops_tx,
                    state,
                    events: events_tx,
                    router,
                    config,
                    handshake,
                    pending,
                }),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ClientError::Handshake("connection task ended".into())),
        }
    }

    /// Open a WebSocket connection to `config.url`.
    pub async fn connect_websocket(config: ClientConfig) -> Result<Self> {
        Self::connect(config, WebSocketConnector).await
    }

    /// Close the connection without reconnecting.
    ///
    /// Pending requests are rejected with `ConnectionLost`. Returns once the
    /// state is `closed`; a no-op if the connection task already ended.
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.shared.ops.send(Op::Disconnect { done: done_tx }).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Issue a state-changing call; resolves once the daemon acknowledges it.
    pub async fn command(&self, method: &str, params: Value) -> Result<()> {
        let _ = self.request(ClientFrame::command(method, params)).await?;
        Ok(())
    }

    /// Issue a read-only call and return its result payload.
    pub async fn query(&self, method: &str, params: Value) -> Result<Value> {
        self.request(ClientFrame::query(method, params)).await
    }

    /// [`query`](Self::query) and decode the result into `T`.
    pub async fn query_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.query(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Protocol(format!("unexpected {method} result: {e}")))
    }

    async fn request(&self, frame: ClientFrame) -> Result<Value> {
        // Fail fast without queuing while the link is down
        if !self.state().is_open() {
            debug!(method = frame.method(), state = %self.state(), "request while not connected");
            return Err(ClientError::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .ops
            .send(Op::Request {
                frame,
                reply: reply_tx,
            })
            .map_err(|_| ClientError::NotConnected)?;
        reply_rx.await.unwrap_or(Err(ClientError::ConnectionLost))
    }

    /// Call `handler` for every broadcast on `channel`.
    ///
    /// Handlers run on the connection task and must not block.
    pub fn subscribe(
        &self,
        channel: &str,
        handler: impl Fn(&BroadcastFrame) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.router.subscribe(channel, handler)
    }

    /// Retain the last `capacity` payloads of `channel`, decoded as `T`.
    pub fn record<T>(&self, channel: &str, capacity: usize) -> ChannelHistory<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        ChannelHistory::attach(&self.shared.router, channel, capacity)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether requests may be sent right now.
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Watch the lifecycle state.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.clone()
    }

    /// Receive state transitions and daemon faults from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Version from the most recent handshake, while connected.
    pub fn server_version(&self) -> Option<String> {
        self.shared
            .handshake
            .read()
            .as_ref()
            .map(|h| h.version.clone())
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.load(Ordering::Relaxed)
    }

    /// Configuration this client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Subscription registry shared by all clones.
    pub fn router(&self) -> &Arc<SubscriptionRouter> {
        &self.shared.router
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}
