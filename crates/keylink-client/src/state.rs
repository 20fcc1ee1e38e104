//! Connection lifecycle states and the notifications emitted on transitions.

use std::fmt;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::errors::ClientError;

/// Lifecycle state of the connection.
///
/// ```text
/// connecting ──► open ──► closing ──► closed          (explicit disconnect)
///     ▲            │
///     │            ▼ unexpected drop
///     │         closed ──► reconnecting{n} ──► connecting
///     │                          │
///     └──────────────────────────┘ attempts exhausted ──► disconnected
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the transport and waiting for the handshake.
    Connecting,
    /// Handshake complete; requests may be sent.
    Open,
    /// Explicit disconnect in progress.
    Closing,
    /// Transport closed. Terminal only after an explicit disconnect.
    Closed,
    /// Waiting out the backoff before reconnect attempt `attempt` (1-based).
    Reconnecting {
        /// Attempt about to be made.
        attempt: u32,
    },
    /// Reconnect attempts exhausted. Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Whether requests may be sent.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Whether the connection task has stopped for good.
    ///
    /// `Closed` is only terminal after an explicit disconnect; an unexpected
    /// drop passes through `Closed` on its way to `Reconnecting`.
    pub fn is_disconnected(self) -> bool {
        self == Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Closing => f.write_str("closing"),
            Self::Closed => f.write_str("closed"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Notification published by the connection task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The lifecycle state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
        /// Failure that caused the transition, if any.
        cause: Option<ClientError>,
    },
    /// The daemon sent a connection-scoped `error` frame.
    ServerFault {
        /// Human-readable description.
        message: String,
        /// Machine-readable code, when provided.
        code: Option<String>,
    },
}

/// Capacity of the event broadcast channel; slow listeners see `Lagged`.
pub(crate) const EVENT_CAPACITY: usize = 64;

/// Publisher side of the state signal, owned by the connection task.
pub(crate) struct StateCell {
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl StateCell {
    pub(crate) fn new(events: broadcast::Sender<ConnectionEvent>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self { state, events }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `to`, publishing a `StateChanged` notification.
    ///
    /// Transitions to the current state are ignored.
    pub(crate) fn transition(&self, to: ConnectionState, cause: Option<ClientError>) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }
        debug!(%from, %to, cause = ?cause, "connection state changed");
        // No listeners is fine
        let _ = self
            .events
            .send(ConnectionEvent::StateChanged { from, to, cause });
    }

    pub(crate) fn publish(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}
