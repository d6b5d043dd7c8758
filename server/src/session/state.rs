use crate::connection::credentials::Credentials;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session ID: the authenticated user's stable identity, supplied by the
/// upstream auth layer. Doubles as the key for the on-disk credential blob.
pub type SessionId = String;

const SESSION_ID_MAX_LENGTH: usize = 128;

/// Validation rules: non-empty, bounded, and safe as a path component.
pub fn validate_session_id(id: &str) -> bool {
    if id.is_empty() || id.len() > SESSION_ID_MAX_LENGTH {
        return false;
    }
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

/// Connection status for one identity. Exactly one value exists per
/// identity at any time; the status endpoint serializes it as-is, so the
/// QR challenge rides along while pairing is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Uninitialized,
    Initializing,
    QrPending { challenge: String },
    Connected,
    Disconnected { reason: DisconnectReason },
}

impl ConnectionStatus {
    /// Active means a connection attempt is in flight or established, and
    /// therefore a ConnectionHandle may exist for the identity.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Initializing
                | ConnectionStatus::QrPending { .. }
                | ConnectionStatus::Connected
        )
    }
}

/// Why a connection ended. Terminal reasons invalidate the stored
/// credentials; transient ones allow a fresh start to reconnect without
/// re-pairing. Neither triggers an automatic reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    LoggedOut,
    ConnectionLost(String),
    Protocol(String),
    Storage(String),
    Stopped,
}

impl DisconnectReason {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut | DisconnectReason::Stopped)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::LoggedOut => write!(f, "logged_out"),
            DisconnectReason::ConnectionLost(detail) => write!(f, "connection_lost: {detail}"),
            DisconnectReason::Protocol(detail) => write!(f, "protocol_error: {detail}"),
            DisconnectReason::Storage(detail) => write!(f, "storage_error: {detail}"),
            DisconnectReason::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle event emitted by a transport for one connection. This is the
/// closed boundary type: whatever the protocol library emits is translated
/// into one of these before it reaches the session layer.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    CredentialsUpdated(Credentials),
    QrIssued { challenge: String },
    Opened,
    Closed { reason: DisconnectReason },
}

/// Session registry configuration
pub struct SessionConfig {
    /// Maximum number of tracked identities
    pub max_sessions: usize,
    /// Depth of the per-connection lifecycle event channel
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 500,
            event_buffer: 64,
        }
    }
}

/// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
