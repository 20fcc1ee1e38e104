//! Frames exchanged over the duplex connection.
//!
//! Every frame is a JSON object discriminated by its `type` field:
//!
//! ```text
//! client → daemon   command | query        {id, method, params}
//!                   subscribe | unsubscribe {id, channel}
//! daemon → client   connected              {version, timestamp}
//!                   response               {id, ok, result? | error?}
//!                   event | state | latency {channel, payload, seq}
//!                   error                  {message, code?}
//! ```
//!
//! Unknown fields are ignored so the daemon can grow frames without breaking
//! older clients. An unknown `type` is a decode error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorBody, FrameError, UNKNOWN};
use crate::ids::CorrelationId;

// ── Client → daemon ─────────────────────────────────────────────────

/// Frame sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// State-changing call; the caller only cares about success.
    Command(RequestFrame),
    /// Read-only call returning a payload.
    Query(RequestFrame),
    /// Ask the daemon to start delivering a channel to this client.
    Subscribe(ChannelFrame),
    /// Ask the daemon to stop delivering a channel to this client.
    Unsubscribe(ChannelFrame),
}

/// Body of `command` and `query` frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id echoed by the matching response.
    pub id: CorrelationId,
    /// Verb name (e.g. `get_profiles`).
    pub method: String,
    /// Parameters payload; `null` when the method takes none.
    #[serde(default)]
    pub params: Value,
}

/// Body of `subscribe` and `unsubscribe` frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFrame {
    /// Correlation id echoed by the matching response.
    pub id: CorrelationId,
    /// Channel name.
    pub channel: String,
}

impl ClientFrame {
    /// Build a `command` frame with a fresh correlation id.
    pub fn command(method: impl Into<String>, params: Value) -> Self {
        Self::Command(RequestFrame {
            id: CorrelationId::new(),
            method: method.into(),
            params,
        })
    }

    /// Build a `query` frame with a fresh correlation id.
    pub fn query(method: impl Into<String>, params: Value) -> Self {
        Self::Query(RequestFrame {
            id: CorrelationId::new(),
            method: method.into(),
            params,
        })
    }

    /// Build a `subscribe` frame with a fresh correlation id.
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Self::Subscribe(ChannelFrame {
            id: CorrelationId::new(),
            channel: channel.into(),
        })
    }

    /// Build an `unsubscribe` frame with a fresh correlation id.
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Self::Unsubscribe(ChannelFrame {
            id: CorrelationId::new(),
            channel: channel.into(),
        })
    }

    /// Correlation id of this frame.
    pub fn id(&self) -> &CorrelationId {
        match self {
            Self::Command(req) | Self::Query(req) => &req.id,
            Self::Subscribe(ch) | Self::Unsubscribe(ch) => &ch.id,
        }
    }

    /// Method name, or the announcement verb for channel frames.
    pub fn method(&self) -> &str {
        match self {
            Self::Command(req) | Self::Query(req) => &req.method,
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Parse a client frame (used by daemon-side tooling and tests).
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Decode)
    }
}

// ── Daemon → client ─────────────────────────────────────────────────

/// Frame sent by the daemon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every connection.
    Connected(Handshake),
    /// Outcome of one command or query.
    Response(ResponseFrame),
    /// Discrete input-processing record.
    Event(BroadcastFrame),
    /// Daemon state snapshot.
    State(BroadcastFrame),
    /// Aggregate timing statistics.
    Latency(BroadcastFrame),
    /// Connection-scoped fault not tied to any request.
    Error(FaultFrame),
}

/// Handshake sent by the daemon as soon as a connection is accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Daemon version string.
    pub version: String,
    /// Daemon clock in microseconds since the UNIX epoch.
    #[serde(default)]
    pub timestamp: u64,
}

/// Response to a `command` or `query`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Correlation id of the request being answered.
    pub id: CorrelationId,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Result payload (present when `ok == true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (present when `ok == false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Payload of `event`, `state` and `latency` broadcasts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastFrame {
    /// Channel the broadcast belongs to.
    pub channel: String,
    /// Channel-specific payload.
    pub payload: Value,
    /// Monotonically increasing sequence number, scoped per channel.
    pub seq: u64,
}

/// Connection-scoped fault report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultFrame {
    /// Human-readable description.
    pub message: String,
    /// Optional machine-readable code (e.g. `CONFIG_LOAD_FAILED`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Which broadcast variant a [`BroadcastFrame`] arrived as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BroadcastKind {
    /// `type: "event"`.
    Event,
    /// `type: "state"`.
    State,
    /// `type: "latency"`.
    Latency,
}

impl BroadcastKind {
    /// Wire name of the variant.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::State => "state",
            Self::Latency => "latency",
        }
    }
}

impl ServerFrame {
    /// Parse inbound text into a frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Decode)
    }

    /// Serialize to JSON text (used by daemon-side tooling and tests).
    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Build a broadcast of the given kind.
    pub fn broadcast(
        kind: BroadcastKind,
        channel: impl Into<String>,
        payload: Value,
        seq: u64,
    ) -> Self {
        let frame = BroadcastFrame {
            channel: channel.into(),
            payload,
            seq,
        };
        match kind {
            BroadcastKind::Event => Self::Event(frame),
            BroadcastKind::State => Self::State(frame),
            BroadcastKind::Latency => Self::Latency(frame),
        }
    }

    /// Wire name of this frame's `type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Response(_) => "response",
            Self::Event(_) => BroadcastKind::Event.as_str(),
            Self::State(_) => BroadcastKind::State.as_str(),
            Self::Latency(_) => BroadcastKind::Latency.as_str(),
            Self::Error(_) => "error",
        }
    }
}

impl ResponseFrame {
    /// Build a success response.
    pub fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failure response.
    pub fn failure(id: CorrelationId, error: ErrorBody) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the success payload or the error body.
    ///
    /// A success without `result` yields `null`; a failure without `error`
    /// yields an `UNKNOWN` body.
    pub fn into_outcome(self) -> Result<Value, ErrorBody> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ErrorBody::new(UNKNOWN, "response carried no error body")))
        }
    }
}

impl BroadcastFrame {
    /// Decode the payload into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        T::deserialize(&self.payload).map_err(FrameError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // ── Client frames ───────────────────────────────────────────────

    #[test]
    fn query_wire_shape() {
        let frame = ClientFrame::Query(RequestFrame {
            id: "q-1".into(),
            method: "get_profiles".into(),
            params: json!({}),
        });
        let v: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "query");
        assert_eq!(v["id"], "q-1");
        assert_eq!(v["method"], "get_profiles");
        assert!(v["params"].is_object());
    }

    #[test]
    fn command_builder_generates_id() {
        let a = ClientFrame::command("activate_profile", json!({"name": "default"}));
        let b = ClientFrame::command("activate_profile", json!({"name": "default"}));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.method(), "activate_profile");
        assert_matches!(a, ClientFrame::Command(_));
    }

    #[test]
    fn request_without_params_defaults_to_null() {
        let frame =
            ClientFrame::parse(r#"{"type":"query","id":"q-2","method":"get_devices"}"#).unwrap();
        assert_matches!(frame, ClientFrame::Query(req) if req.params.is_null());
    }

    #[test]
    fn subscribe_wire_shape() {
        let frame = ClientFrame::subscribe("events");
        let v: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "subscribe");
        assert_eq!(v["channel"], "events");
        assert!(v["id"].is_string());
        assert_eq!(frame.method(), "subscribe");
    }

    // ── Server frames ───────────────────────────────────────────────

    #[test]
    fn parse_handshake() {
        let frame =
            ServerFrame::parse(r#"{"type":"connected","version":"0.9.1","timestamp":17}"#).unwrap();
        assert_matches!(frame, ServerFrame::Connected(h) if h.version == "0.9.1" && h.timestamp == 17);
    }

    #[test]
    fn parse_success_response() {
        let raw = r#"{"type":"response","id":"q-1","ok":true,"result":[{"name":"default"}]}"#;
        let ServerFrame::Response(resp) = ServerFrame::parse(raw).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.id.as_str(), "q-1");
        assert_eq!(resp.into_outcome().unwrap(), json!([{"name": "default"}]));
    }

    #[test]
    fn parse_error_response() {
        let raw = r#"{"type":"response","id":"q-1","ok":false,"error":{"kind":"PROFILE_NOT_FOUND","message":"gone"}}"#;
        let ServerFrame::Response(resp) = ServerFrame::parse(raw).unwrap() else {
            panic!("expected response");
        };
        let err = resp.into_outcome().unwrap_err();
        assert_eq!(err.kind, "PROFILE_NOT_FOUND");
        assert_eq!(err.message, "gone");
    }

    #[test]
    fn success_without_result_is_null() {
        let resp = ResponseFrame {
            id: "c-1".into(),
            ok: true,
            result: None,
            error: None,
        };
        assert_eq!(resp.into_outcome().unwrap(), Value::Null);
    }

    #[test]
    fn failure_without_body_is_unknown() {
        let resp = ResponseFrame {
            id: "c-1".into(),
            ok: false,
            result: None,
            error: None,
        };
        assert_eq!(resp.into_outcome().unwrap_err().kind, UNKNOWN);
    }

    #[test]
    fn success_response_omits_error_field() {
        let frame = ServerFrame::Response(ResponseFrame::success("r".into(), json!(1)));
        let json = frame.to_json().unwrap();
        assert!(!json.contains("error"));
        assert!(json.contains(r#""ok":true"#));
    }

    #[test]
    fn parse_each_broadcast_kind() {
        for (kind, name) in [
            (BroadcastKind::Event, "event"),
            (BroadcastKind::State, "state"),
            (BroadcastKind::Latency, "latency"),
        ] {
            let raw = format!(r#"{{"type":"{name}","channel":"c","payload":{{"x":1}},"seq":9}}"#);
            let frame = ServerFrame::parse(&raw).unwrap();
            assert_eq!(frame.type_name(), kind.as_str());
            assert_eq!(frame, ServerFrame::broadcast(kind, "c", json!({"x": 1}), 9));
        }
    }

    #[test]
    fn broadcast_ignores_unknown_fields() {
        let raw = r#"{"type":"state","channel":"daemon-state","payload":{},"seq":3,"extra":true}"#;
        assert_matches!(ServerFrame::parse(raw), Ok(ServerFrame::State(f)) if f.seq == 3);
    }

    #[test]
    fn parse_fault_frame() {
        let raw = r#"{"type":"error","message":"config reload failed","code":"CONFIG_LOAD_FAILED"}"#;
        let frame = ServerFrame::parse(raw).unwrap();
        assert_matches!(frame, ServerFrame::Error(f) if f.code.as_deref() == Some("CONFIG_LOAD_FAILED"));
    }

    #[test]
    fn unknown_type_is_decode_error() {
        let err = ServerFrame::parse(r#"{"type":"telemetry","channel":"x"}"#).unwrap_err();
        assert_matches!(err, FrameError::Decode(_));
    }

    #[test]
    fn missing_tag_is_decode_error() {
        assert!(ServerFrame::parse(r#"{"id":"x","ok":true}"#).is_err());
        assert!(ServerFrame::parse("not json").is_err());
        assert!(ServerFrame::parse("[1,2]").is_err());
    }

    #[test]
    fn broadcast_decode_typed() {
        #[derive(Deserialize)]
        struct Sample {
            n: u32,
        }
        let frame = BroadcastFrame {
            channel: "c".into(),
            payload: json!({"n": 5}),
            seq: 1,
        };
        assert_eq!(frame.decode::<Sample>().unwrap().n, 5);
        assert!(frame.decode::<Vec<u32>>().is_err());
    }
}
