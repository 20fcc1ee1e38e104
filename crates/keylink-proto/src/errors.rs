//! Error bodies carried by failed responses, and frame codec errors.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Well-known server error kinds ───────────────────────────────────

/// Method is not known to the daemon.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected daemon-side failure.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Named profile does not exist.
pub const PROFILE_NOT_FOUND: &str = "PROFILE_NOT_FOUND";
/// Failed response that carried no error body.
pub const UNKNOWN: &str = "UNKNOWN";

/// Structured error inside an `ok: false` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Server-defined machine-readable kind (e.g. `PROFILE_NOT_FOUND`).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Failure to encode or decode a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Inbound text is not a recognized frame.
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    /// Outbound frame could not be serialized.
    #[error("unserializable frame: {0}")]
    Encode(#[source] serde_json::Error),
}
