//! Boundary traits for the underlying messaging protocol library.
//!
//! The session layer never talks to the protocol library directly: it asks
//! a [`Transport`] for a connection and consumes the typed
//! [`ConnectionEvent`](crate::session::state::ConnectionEvent) stream the
//! transport emits. Production wires in a binding to the real protocol
//! engine; tests script a mock.

use crate::connection::credentials::Credentials;
use crate::session::state::{ConnectionEvent, SessionId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Transport-level connection errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// A live protocol connection for one identity.
///
/// The registry holds the only reference while the connection is active
/// and drops it on disconnect. `close` must be idempotent: teardown can
/// race a transport-side close.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Stable id for log correlation.
    fn id(&self) -> Uuid;

    /// Tear the connection down. The transport may still emit a final
    /// `Closed` event afterwards; consumers must tolerate it.
    async fn close(&self);
}

/// Factory for protocol connections.
///
/// Implementations must emit every lifecycle event for the connection on
/// `events`, in emission order: credential updates as the protocol rotates
/// keys, QR challenges while pairing, then `Opened`, and finally exactly
/// one `Closed` (or dropping the sender, which consumers treat as a lost
/// connection).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Credentials,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError>;
}
