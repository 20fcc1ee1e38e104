//! Transport seam between the connection task and the wire.
//!
//! A [`Connector`] opens one duplex link per (re)connect and hands back a
//! [`Transport`]: a sink of outbound JSON text and a stream of inbound items.
//! Framing into [`ClientFrame`](keylink_proto::ClientFrame)s and
//! [`ServerFrame`](keylink_proto::ServerFrame)s happens above this layer.

pub mod memory;
pub mod websocket;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::errors::ClientError;

pub use memory::{MemoryConnector, ServerEnd};
pub use websocket::WebSocketConnector;

/// Item read from a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// One JSON text frame.
    Text(String),
    /// Transport-level keepalive (WebSocket ping/pong). Counts as activity.
    Heartbeat,
}

/// Outbound half: accepts serialized frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;

/// Inbound half: ends when the peer closes the link.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound, ClientError>> + Send>>;

/// An open duplex link.
pub struct Transport {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames and heartbeats.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens links to a daemon endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new link to `url`.
    async fn connect(&self, url: &str) -> Result<Transport, ClientError>;
}
