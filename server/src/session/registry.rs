use crate::connection::credentials::CredentialStore;
use crate::connection::lifecycle;
use crate::connection::transport::{ConnectionHandle, Transport};
use crate::session::state::{
    ConnectionStatus, DisconnectReason, SessionConfig, SessionId, validate_session_id,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::join_all;
use metrics::counter;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors from starting a session
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid session identity")]
    InvalidIdentity,

    #[error("session capacity reached (max {0})")]
    CapacityExceeded(usize),
}

/// Errors from stopping a session
#[derive(Debug, Error)]
pub enum StopError {
    #[error("no active session for {0}")]
    NotActive(SessionId),
}

/// Outcome of a successful start call. Starting an identity that already
/// has a live attempt is a no-op, not an error: the underlying protocol
/// cannot safely carry two connections for one identity, so the second
/// caller just rides along with the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAck {
    Started,
    AlreadyActive,
}

struct SessionEntry {
    status: ConnectionStatus,
    handle: Option<Arc<dyn ConnectionHandle>>,
    /// Identifies the connection attempt that owns this entry. Transitions
    /// carrying a stale attempt id are dropped, so a finished or stopped
    /// attempt can never clobber its successor or resurrect its handle.
    attempt: Uuid,
}

struct RegistryInner {
    sessions: DashMap<SessionId, SessionEntry>,
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    config: SessionConfig,
}

/// Session registry: the single source of truth for which identities have
/// a connection attempt in flight or established.
///
/// The map is sharded by key (DashMap), so setup for one identity never
/// serializes against unrelated identities. All status mutation for one
/// identity funnels through its lifecycle task (plus the explicit stop
/// path), both guarded by the attempt id.
///
/// Cheap to clone; constructed once at startup and handed to request
/// handlers and lifecycle tasks.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                transport,
                credentials,
                config,
            }),
        }
    }

    /// Start (or join) a connection attempt for `id`.
    ///
    /// Idempotent and non-blocking: returns as soon as the entry is
    /// registered, while the handshake proceeds in a background task.
    /// Callers poll [`status`](Self::status) until the attempt settles.
    pub fn start_session(&self, id: &str) -> Result<StartAck, StartError> {
        if !validate_session_id(id) {
            return Err(StartError::InvalidIdentity);
        }

        // DashMap::len takes every shard, so it must be read before
        // entry() pins a shard write lock below.
        let at_capacity = self.inner.sessions.len() >= self.inner.config.max_sessions;

        // Existence check and entry creation happen under one shard lock,
        // so two racing starts for the same identity cannot both spawn a
        // connection.
        let attempt = Uuid::new_v4();
        match self.inner.sessions.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().status.is_active() {
                    debug!(session = %id, "start ignored, session already active");
                    return Ok(StartAck::AlreadyActive);
                }
                let entry = occupied.get_mut();
                entry.status = ConnectionStatus::Initializing;
                entry.handle = None;
                entry.attempt = attempt;
            }
            Entry::Vacant(vacant) => {
                if at_capacity {
                    warn!(
                        session = %id,
                        max = self.inner.config.max_sessions,
                        "session capacity reached"
                    );
                    return Err(StartError::CapacityExceeded(self.inner.config.max_sessions));
                }
                vacant.insert(SessionEntry {
                    status: ConnectionStatus::Initializing,
                    handle: None,
                    attempt,
                });
            }
        }

        counter!("wabridge_sessions_started_total").increment(1);
        info!(session = %id, %attempt, "starting messaging session");

        let registry = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            lifecycle::run(registry, id, attempt).await;
        });

        Ok(StartAck::Started)
    }

    /// Current status for `id`. Non-blocking read; identities that were
    /// never started report `Uninitialized`.
    pub fn status(&self, id: &str) -> ConnectionStatus {
        self.inner
            .sessions
            .get(id)
            .map(|entry| entry.status.clone())
            .unwrap_or(ConnectionStatus::Uninitialized)
    }

    /// Live connection handle for `id`, if any. Accessor for message-send
    /// operations layered on top of the registry.
    pub fn handle(&self, id: &str) -> Option<Arc<dyn ConnectionHandle>> {
        self.inner
            .sessions
            .get(id)
            .and_then(|entry| entry.handle.clone())
    }

    /// Deterministically stop an active session.
    ///
    /// The attempt id is retired before the handle is closed, so a
    /// lifecycle event still in flight from the old attempt (including an
    /// `Opened` racing this stop) is dropped on arrival.
    pub async fn stop_session(&self, id: &str) -> Result<(), StopError> {
        let handle = {
            let mut entry = self
                .inner
                .sessions
                .get_mut(id)
                .ok_or_else(|| StopError::NotActive(id.to_string()))?;
            if !entry.status.is_active() {
                return Err(StopError::NotActive(id.to_string()));
            }
            entry.attempt = Uuid::new_v4();
            entry.status = ConnectionStatus::Disconnected {
                reason: DisconnectReason::Stopped,
            };
            entry.handle.take()
            // Shard lock released here; close must not run under it.
        };

        if let Some(handle) = handle {
            handle.close().await;
        }

        counter!("wabridge_sessions_stopped_total").increment(1);
        info!(session = %id, "session stopped");
        Ok(())
    }

    /// Number of identities with an attempt in flight or established.
    pub fn active_count(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|entry| entry.status.is_active())
            .count()
    }

    /// Close every active handle. Used on graceful shutdown; the resulting
    /// close events settle the entries as disconnected.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<dyn ConnectionHandle>> = self
            .inner
            .sessions
            .iter()
            .filter_map(|entry| entry.handle.clone())
            .collect();

        info!(connections = handles.len(), "closing active connections");
        join_all(handles.iter().map(|handle| handle.close())).await;
    }

    /// Install the live handle once the transport handshake returns.
    /// Returns false when the attempt has been superseded; the caller
    /// still owns the handle and must close it.
    pub(crate) fn install_handle(
        &self,
        id: &str,
        attempt: Uuid,
        handle: Arc<dyn ConnectionHandle>,
    ) -> bool {
        match self.inner.sessions.get_mut(id) {
            Some(mut entry) if entry.attempt == attempt && entry.status.is_active() => {
                debug!(session = %id, connection = %handle.id(), "connection handle installed");
                entry.handle = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Apply one status transition from a lifecycle task. Transitions are
    /// applied in the order the task delivers them; stale attempts are
    /// dropped.
    pub(crate) fn apply_transition(&self, id: &str, attempt: Uuid, status: ConnectionStatus) {
        let Some(mut entry) = self.inner.sessions.get_mut(id) else {
            return;
        };
        if entry.attempt != attempt {
            debug!(session = %id, %attempt, "dropping transition from superseded attempt");
            return;
        }

        if let ConnectionStatus::Disconnected { reason } = &status {
            // Terminal for this attempt: the handle must not outlive the
            // disconnected status.
            entry.handle = None;
            counter!(
                "wabridge_sessions_disconnected_total",
                "terminal" => if reason.is_terminal() { "true" } else { "false" }
            )
            .increment(1);
        }
        entry.status = status;
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn credential_store(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}
