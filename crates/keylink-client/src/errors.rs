//! Client error types.

use keylink_proto::ErrorBody;
use thiserror::Error;

/// Errors surfaced to callers of the client.
///
/// `Clone` so that one connection-level failure can be fanned out to every
/// pending waiter.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClientError {
    /// A frame was about to be sent while the connection was not open.
    #[error("not connected")]
    NotConnected,
    /// No response arrived within the request timeout.
    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout {
        /// Method of the request that timed out.
        method: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// The connection dropped while the request was pending.
    #[error("connection lost")]
    ConnectionLost,
    /// The daemon answered with `ok: false`.
    #[error("server error [{kind}]: {message}")]
    Server {
        /// Server-defined error kind.
        kind: String,
        /// Human-readable message.
        message: String,
    },
    /// An inbound frame could not be decoded or routed.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The connection opened but the handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The configuration was rejected before connecting.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Reconnection gave up; the client is permanently disconnected.
    #[error("disconnected after {attempts} reconnect attempts")]
    Disconnected {
        /// Reconnect attempts made before giving up.
        attempts: u32,
    },
}

impl ClientError {
    /// Whether this error came from the daemon rather than the link.
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// Server error kind, if this is a server error.
    pub fn server_kind(&self) -> Option<&str> {
        match self {
            Self::Server { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl From<ErrorBody> for ClientError {
    fn from(body: ErrorBody) -> Self {
        Self::Server {
            kind: body.kind,
            message: body.message,
        }
    }
}

impl From<keylink_proto::FrameError> for ClientError {
    fn from(err: keylink_proto::FrameError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors that can occur when loading client settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A settings value was invalid (e.g. zero timeout).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

impl From<SettingsError> for ClientError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use keylink_proto::errors::PROFILE_NOT_FOUND;

    #[test]
    fn server_error_from_body() {
        let err: ClientError = ErrorBody::new(PROFILE_NOT_FOUND, "no such profile").into();
        assert!(err.is_server());
        assert_eq!(err.server_kind(), Some(PROFILE_NOT_FOUND));
        assert_eq!(
            err.to_string(),
            "server error [PROFILE_NOT_FOUND]: no such profile"
        );
    }

    #[test]
    fn timeout_display() {
        let err = ClientError::Timeout {
            method: "get_profiles".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.to_string(), "get_profiles timed out after 30000ms");
        assert_eq!(err.server_kind(), None);
    }

    #[test]
    fn frame_error_maps_to_protocol() {
        let frame_err = keylink_proto::ServerFrame::parse("{bad").unwrap_err();
        let err: ClientError = frame_err.into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn errors_clone_equal() {
        let err = ClientError::Disconnected { attempts: 3 };
        assert_eq!(err.clone(), err);
        assert_eq!(err.to_string(), "disconnected after 3 reconnect attempts");
    }

    #[test]
    fn settings_invalid_value_display() {
        let err = SettingsError::InvalidValue("requestTimeoutMs must be > 0".into());
        assert_eq!(
            err.to_string(),
            "invalid settings value: requestTimeoutMs must be > 0"
        );
    }

    #[test]
    fn settings_io_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::Io(_)));
    }
}
