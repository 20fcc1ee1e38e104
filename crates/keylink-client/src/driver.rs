//! Connection task: owns the transport, the pending-request table and the
//! lifecycle state machine.
//!
//! Callers never touch any of these directly; they send [`Op`]s over an
//! unbounded channel and wait on a oneshot. Everything below therefore runs
//! on one logical thread of control.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use keylink_proto::{ClientFrame, Handshake, ServerFrame};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::correlator::{Correlator, Reply};
use crate::errors::ClientError;
use crate::router::{Interest, SubscriptionRouter};
use crate::state::{ConnectionEvent, ConnectionState, StateCell};
use crate::transport::{Connector, FrameSink, Inbound, Transport};

/// Request from a [`Client`](crate::Client) handle to the connection task.
pub(crate) enum Op {
    /// Send a frame and settle `reply` with its outcome.
    Request { frame: ClientFrame, reply: Reply },
    /// Local channel interest changed.
    Announce(Interest),
    /// Tear the connection down without reconnecting.
    Disconnect { done: oneshot::Sender<()> },
}

/// Why a non-open phase was cut short.
enum Interrupt {
    Disconnect(oneshot::Sender<()>),
    /// Every client handle is gone.
    Shutdown,
}

/// Outcome of one connect + handshake attempt.
enum Attempt {
    Open(Transport),
    Failed(ClientError),
    Interrupted(Interrupt),
}

/// How an open connection ended.
enum Exit {
    Dropped(ClientError),
    Disconnect(FrameSink, oneshot::Sender<()>),
    Shutdown(FrameSink),
}

pub(crate) struct Driver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    cell: StateCell,
    ops: mpsc::UnboundedReceiver<Op>,
    router: Arc<SubscriptionRouter>,
    handshake: Arc<RwLock<Option<Handshake>>>,
    correlator: Correlator,
}

impl Driver {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        cell: StateCell,
        ops: mpsc::UnboundedReceiver<Op>,
        router: Arc<SubscriptionRouter>,
        handshake: Arc<RwLock<Option<Handshake>>>,
        pending: Arc<AtomicUsize>,
    ) -> Self {
        let correlator = Correlator::new(config.request_timeout(), pending);
        Self {
            config,
            connector,
            cell,
            ops,
            router,
            handshake,
            correlator,
        }
    }

    /// Connect, report the outcome on `ready`, then serve until torn down.
    ///
    /// A failed initial connect is reported and not retried.
    pub(crate) async fn run(mut self, ready: oneshot::Sender<Result<(), ClientError>>) {
        let mut transport = match self.establish().await {
            Attempt::Open(transport) => {
                let _ = ready.send(Ok(()));
                transport
            }
            Attempt::Failed(err) => {
                warn!(url = %self.config.url, error = %err, "initial connect failed");
                self.cell.transition(ConnectionState::Closed, Some(err.clone()));
                let _ = ready.send(Err(err));
                return;
            }
            Attempt::Interrupted(interrupt) => {
                let _ = ready.send(Err(ClientError::NotConnected));
                self.interrupt(interrupt).await;
                return;
            }
        };

        loop {
            let cause = match self.serve(transport).await {
                Exit::Dropped(cause) => cause,
                Exit::Disconnect(sink, done) => {
                    self.close(Some(sink)).await;
                    let _ = done.send(());
                    return;
                }
                Exit::Shutdown(sink) => {
                    self.close(Some(sink)).await;
                    return;
                }
            };

            let lost = self.correlator.drain(&ClientError::ConnectionLost);
            warn!(url = %self.config.url, error = %cause, pending = lost, "connection dropped");
            *self.handshake.write() = None;
            self.cell.transition(ConnectionState::Closed, Some(cause));

            match self.reconnect().await {
                Some(next) => transport = next,
                None => return,
            }
        }
    }

    // ── Phases ──────────────────────────────────────────────────────────

    /// One connect + handshake attempt under the handshake timeout.
    ///
    /// Requests arriving meanwhile fail fast with `NotConnected`.
    async fn establish(&mut self) -> Attempt {
        self.cell.transition(ConnectionState::Connecting, None);

        let timeout = self.config.handshake_timeout();
        let attempt = tokio::time::timeout(
            timeout,
            open_and_handshake(Arc::clone(&self.connector), self.config.url.clone()),
        );
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok((transport, handshake))) => {
                            self.opened(handshake);
                            Attempt::Open(transport)
                        }
                        Ok(Err(err)) => Attempt::Failed(err),
                        Err(_) => Attempt::Failed(ClientError::Handshake(format!(
                            "no handshake within {}ms",
                            timeout.as_millis()
                        ))),
                    };
                }
                op = self.ops.recv() => {
                    let Some(op) = op else {
                        return Attempt::Interrupted(Interrupt::Shutdown);
                    };
                    if let Some(interrupt) = refuse(op) {
                        return Attempt::Interrupted(interrupt);
                    }
                }
            }
        }
    }

    fn opened(&mut self, handshake: Handshake) {
        info!(url = %self.config.url, version = %handshake.version, "connected");
        *self.handshake.write() = Some(handshake);
        self.router.reset_sequences();
        self.cell.transition(ConnectionState::Open, None);
    }

    /// Pump frames until the link drops or the caller tears it down.
    async fn serve(&mut self, transport: Transport) -> Exit {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        if self.config.announce_subscriptions {
            for channel in self.router.channels() {
                if let Err(err) = self.send(&mut sink, ClientFrame::subscribe(channel), None).await {
                    return Exit::Dropped(err);
                }
            }
        }

        let liveness = self.config.liveness_timeout();
        let mut last_activity = Instant::now();

        loop {
            let idle_deadline = liveness.and_then(|d| last_activity.checked_add(d));
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Inbound::Text(text))) => {
                        last_activity = Instant::now();
                        self.route(&text);
                    }
                    Some(Ok(Inbound::Heartbeat)) => last_activity = Instant::now(),
                    Some(Err(ClientError::Protocol(reason))) => {
                        warn!(%reason, "dropping undecodable inbound item");
                    }
                    Some(Err(err)) => return Exit::Dropped(err),
                    None => {
                        return Exit::Dropped(ClientError::Transport(
                            "connection closed by daemon".into(),
                        ));
                    }
                },
                op = self.ops.recv() => match op {
                    Some(Op::Request { frame, reply }) => {
                        if let Err(err) = self.send(&mut sink, frame, Some(reply)).await {
                            return Exit::Dropped(err);
                        }
                    }
                    Some(Op::Announce(interest)) => {
                        let frame = match interest {
                            Interest::Gained(channel) => ClientFrame::subscribe(channel),
                            Interest::Lost(channel) => ClientFrame::unsubscribe(channel),
                        };
                        if let Err(err) = self.send(&mut sink, frame, None).await {
                            return Exit::Dropped(err);
                        }
                    }
                    Some(Op::Disconnect { done }) => return Exit::Disconnect(sink, done),
                    None => return Exit::Shutdown(sink),
                },
                () = self.correlator.expire_next() => {}
                () = idle_until(idle_deadline) => {
                    let ms = liveness.map_or(0, |d| d.as_millis());
                    return Exit::Dropped(ClientError::Transport(format!(
                        "no traffic for {ms}ms"
                    )));
                }
            }
        }
    }

    /// Back off and retry until a connection opens or the policy gives up.
    async fn reconnect(&mut self) -> Option<Transport> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let Some(delay) = self.config.reconnect.delay_for(attempt) else {
                let attempts = attempt - 1;
                error!(url = %self.config.url, attempts, "reconnect attempts exhausted");
                let err = ClientError::Disconnected { attempts };
                let _ = self.correlator.drain(&err);
                self.cell.transition(ConnectionState::Disconnected, Some(err));
                return None;
            };

            self.cell
                .transition(ConnectionState::Reconnecting { attempt }, None);
            info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting"
            );
            if let Some(interrupt) = self.wait(delay).await {
                self.interrupt(interrupt).await;
                return None;
            }

            match self.establish().await {
                Attempt::Open(transport) => return Some(transport),
                Attempt::Failed(err) => {
                    warn!(attempt, error = %err, "reconnect attempt failed");
                    self.cell.transition(ConnectionState::Closed, Some(err));
                }
                Attempt::Interrupted(interrupt) => {
                    self.interrupt(interrupt).await;
                    return None;
                }
            }
        }
    }

    /// Sleep for `delay` while refusing requests.
    async fn wait(&mut self, delay: Duration) -> Option<Interrupt> {
        let timer = sleep(delay);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                () = &mut timer => return None,
                op = self.ops.recv() => {
                    let Some(op) = op else {
                        return Some(Interrupt::Shutdown);
                    };
                    if let Some(interrupt) = refuse(op) {
                        return Some(interrupt);
                    }
                }
            }
        }
    }

    async fn interrupt(&mut self, interrupt: Interrupt) {
        self.close(None).await;
        if let Interrupt::Disconnect(done) = interrupt {
            let _ = done.send(());
        }
    }

    /// Explicit teardown: `closing`, close the link, reject leftovers, `closed`.
    async fn close(&mut self, sink: Option<FrameSink>) {
        self.cell.transition(ConnectionState::Closing, None);
        if let Some(mut sink) = sink {
            match tokio::time::timeout(self.config.handshake_timeout(), sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "error closing transport"),
                Err(_) => debug!("transport close timed out"),
            }
        }
        let _ = self.correlator.drain(&ClientError::ConnectionLost);
        *self.handshake.write() = None;
        self.cell.transition(ConnectionState::Closed, None);
        info!(url = %self.config.url, "disconnected");
    }

    // ── Frames ──────────────────────────────────────────────────────────

    /// Register `frame` as pending and write it.
    ///
    /// A write failure leaves the entry pending; the caller treats the link
    /// as dropped and the drain rejects it with `ConnectionLost`.
    async fn send(
        &mut self,
        sink: &mut FrameSink,
        frame: ClientFrame,
        reply: Option<Reply>,
    ) -> Result<(), ClientError> {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(err) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err.into()));
                }
                return Ok(());
            }
        };
        let id = frame.id().clone();
        let method = frame.method();
        debug!(%id, method, "sending request");
        self.correlator.register(id, method, reply);
        sink.send(text).await
    }

    /// Demultiplex one inbound text frame.
    fn route(&mut self, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, len = text.len(), "dropping malformed frame");
                return;
            }
        };
        match frame {
            ServerFrame::Response(response) => {
                let _ = self.correlator.resolve(response);
            }
            ServerFrame::Event(broadcast)
            | ServerFrame::State(broadcast)
            | ServerFrame::Latency(broadcast) => {
                let delivered = self.router.dispatch(&broadcast);
                debug!(channel = %broadcast.channel, seq = broadcast.seq, delivered, "broadcast dispatched");
            }
            ServerFrame::Error(fault) => {
                warn!(message = %fault.message, code = ?fault.code, "daemon reported fault");
                self.cell.publish(ConnectionEvent::ServerFault {
                    message: fault.message,
                    code: fault.code,
                });
            }
            ServerFrame::Connected(handshake) => {
                debug!(version = %handshake.version, "repeated handshake on open connection");
                *self.handshake.write() = Some(handshake);
            }
        }
    }
}

impl Drop for Driver {
    /// Settle the public state if the task ends without a terminal transition
    /// (a panic inside a transport or the runtime shutting down).
    fn drop(&mut self) {
        let state = self.cell.current();
        if !matches!(state, ConnectionState::Closed | ConnectionState::Disconnected) {
            error!(url = %self.config.url, %state, "connection task ended unexpectedly");
            let _ = self.correlator.drain(&ClientError::ConnectionLost);
            *self.handshake.write() = None;
            self.cell.transition(
                ConnectionState::Disconnected,
                Some(ClientError::Transport("connection task ended".into())),
            );
        }
    }
}

/// Answer an op that arrived while the connection is not open.
fn refuse(op: Op) -> Option<Interrupt> {
    match op {
        Op::Request { frame, reply } => {
            debug!(method = frame.method(), "refusing request while not connected");
            let _ = reply.send(Err(ClientError::NotConnected));
            None
        }
        // Replayed from the router once the connection opens
        Op::Announce(_) => None,
        Op::Disconnect { done } => Some(Interrupt::Disconnect(done)),
    }
}

async fn open_and_handshake(
    connector: Arc<dyn Connector>,
    url: String,
) -> Result<(Transport, Handshake), ClientError> {
    let mut transport = connector.connect(&url).await?;
    loop {
        match transport.stream.next().await {
            Some(Ok(Inbound::Heartbeat)) => {}
            Some(Ok(Inbound::Text(text))) => {
                return match ServerFrame::parse(&text) {
                    Ok(ServerFrame::Connected(handshake)) => Ok((transport, handshake)),
                    Ok(other) => Err(ClientError::Handshake(format!(
                        "expected connected frame, got {}",
                        other.type_name()
                    ))),
                    Err(err) => Err(ClientError::Handshake(err.to_string())),
                };
            }
            Some(Err(err)) => return Err(err),
            None => {
                return Err(ClientError::Handshake(
                    "connection closed before handshake".into(),
                ));
            }
        }
    }
}

async fn idle_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
