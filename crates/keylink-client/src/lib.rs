//! # keylink-client
//!
//! Real-time client for the keyrx daemon over one long-lived duplex link.
//!
//! - [`Client`]: `command`/`query` calls, channel subscriptions, lifecycle state
//! - [`router`]: channel → handler registry with per-channel ordering and
//!   handler isolation
//! - [`history`]: bounded FIFO buffers fed from channels
//! - [`transport`]: [`Connector`](transport::Connector) seam with WebSocket
//!   and in-memory implementations
//! - [`config`] / [`settings`]: configuration and `~/.keylink/client.json` loading
//!
//! # Architecture
//!
//! Each client spawns one connection task that exclusively owns the
//! transport, the pending-request table and the lifecycle state machine.
//! Client handles talk to it over a channel, so all state mutation happens on
//! a single logical thread of control. Responses settle requests in arrival
//! order; unexpected drops reject every pending request and trigger bounded
//! reconnection.

#![deny(unsafe_code)]

pub mod backoff;
pub mod client;
pub mod config;
mod correlator;
mod driver;
pub mod errors;
pub mod history;
pub mod logging;
pub mod router;
pub mod settings;
pub mod state;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use client::Client;
pub use config::ClientConfig;
pub use errors::{ClientError, SettingsError};
pub use history::{ChannelHistory, HistoryBuffer};
pub use router::{Subscription, SubscriptionRouter};
pub use state::{ConnectionEvent, ConnectionState};
pub use transport::{Connector, MemoryConnector, ServerEnd, WebSocketConnector};

pub use keylink_proto as proto;
