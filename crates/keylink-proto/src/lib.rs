//! # keylink-proto
//!
//! Wire format spoken between a keylink client and the keyrx daemon over a
//! single duplex connection.
//!
//! - [`envelope`]: client and server frames, tagged by `type`
//! - [`ids`]: random correlation ids linking requests to responses
//! - [`errors`]: error bodies carried by failed responses, frame codec errors
//! - [`channels`]: recognized broadcast channels and their typed payloads

#![deny(unsafe_code)]

pub mod channels;
pub mod envelope;
pub mod errors;
pub mod ids;

pub use envelope::{
    BroadcastFrame, BroadcastKind, ChannelFrame, ClientFrame, FaultFrame, Handshake, RequestFrame,
    ResponseFrame, ServerFrame,
};
pub use errors::{ErrorBody, FrameError};
pub use ids::CorrelationId;
