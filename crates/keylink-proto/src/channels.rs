//! Recognized broadcast channels and their typed payloads.
//!
//! Channel names are open-ended strings; the constants below are the ones
//! the daemon currently emits. Payload records tolerate unknown fields.

use serde::{Deserialize, Serialize};

/// Modifier/lock/layer/profile snapshots (`state` frames).
pub const STATE: &str = "daemon-state";
/// Discrete input-processing records (`event` frames).
pub const EVENTS: &str = "events";
/// Periodic aggregate timing statistics (`latency` frames).
pub const LATENCY: &str = "latency";

/// Every channel the daemon is known to emit.
pub const ALL: [&str; 3] = [STATE, EVENTS, LATENCY];

/// History depth used for the `events` channel.
pub const EVENTS_HISTORY: usize = 100;
/// History depth used for the `latency` channel.
pub const LATENCY_HISTORY: usize = 60;

/// Daemon state snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    /// Active modifier ids (e.g. `MD_00`).
    #[serde(default)]
    pub modifiers: Vec<String>,
    /// Active lock ids (e.g. `LK_00`).
    #[serde(default)]
    pub locks: Vec<String>,
    /// Current layer name.
    #[serde(default)]
    pub layer: String,
    /// Active profile, if one is loaded.
    #[serde(
        default,
        alias = "active_profile",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_profile: Option<String>,
}

/// One key press or release as processed by the daemon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEventRecord {
    /// Microseconds since the UNIX epoch.
    pub timestamp: u64,
    /// Key code (e.g. `KEY_A`).
    pub key_code: String,
    /// `press` or `release`.
    pub event_type: String,
    /// Key before remapping.
    pub input: String,
    /// Key after remapping.
    pub output: String,
    /// Processing latency in microseconds.
    pub latency: u64,
    /// Stable id of the source device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Human-readable name of the source device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Mapping kind applied (`simple`, `tap_hold`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_type: Option<String>,
    /// Whether any mapping fired for this event.
    #[serde(default)]
    pub mapping_triggered: bool,
}

impl KeyEventRecord {
    /// Whether this record is a key press.
    pub fn is_press(&self) -> bool {
        self.event_type == "press"
    }
}

/// Latency statistics in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Fastest sample.
    pub min: u64,
    /// Mean over the window.
    pub avg: u64,
    /// Slowest sample.
    pub max: u64,
    /// 95th percentile.
    pub p95: u64,
    /// 99th percentile.
    pub p99: u64,
    /// Snapshot time, microseconds since the UNIX epoch.
    pub timestamp: u64,
}
