//! Per-identity connection lifecycle.
//!
//! Each start attempt runs as one spawned task: load credentials, open the
//! transport connection, then drain the connection's event stream into the
//! registry. The task is the single update path for its identity, so
//! transitions land in the order the transport emitted them. Every
//! outcome, success or failure, is encoded as a status in the registry;
//! nothing propagates out of the task.

use crate::connection::transport::ConnectionHandle;
use crate::session::registry::SessionRegistry;
use crate::session::state::{ConnectionEvent, ConnectionStatus, DisconnectReason};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drive one connection attempt from credential load to disconnect.
pub(crate) async fn run(registry: SessionRegistry, id: String, attempt: Uuid) {
    let (events_tx, events_rx) = mpsc::channel(registry.config().event_buffer);

    let credentials = match registry.credential_store().load_or_init(&id).await {
        Ok(credentials) => credentials,
        Err(e) => {
            error!(session = %id, error = %e, "credential load failed");
            registry.apply_transition(
                &id,
                attempt,
                ConnectionStatus::Disconnected {
                    reason: DisconnectReason::Storage(e.to_string()),
                },
            );
            return;
        }
    };

    if credentials.is_empty() {
        debug!(session = %id, "unpaired identity, expecting a QR challenge");
    }

    let handle = match registry
        .transport()
        .connect(&id, credentials, events_tx)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            warn!(session = %id, error = %e, "protocol connect failed");
            registry.apply_transition(
                &id,
                attempt,
                ConnectionStatus::Disconnected {
                    reason: DisconnectReason::Protocol(e.to_string()),
                },
            );
            return;
        }
    };

    if !registry.install_handle(&id, attempt, Arc::clone(&handle)) {
        // A stop (or a newer start) retired this attempt while the
        // handshake was in flight; the handle was never published.
        debug!(session = %id, %attempt, "attempt superseded during handshake");
        handle.close().await;
        return;
    }

    pump_events(&registry, &id, attempt, handle, events_rx).await;
}

/// Apply lifecycle events strictly in emission order until the connection
/// closes.
async fn pump_events(
    registry: &SessionRegistry,
    id: &str,
    attempt: Uuid,
    handle: Arc<dyn ConnectionHandle>,
    mut events_rx: mpsc::Receiver<ConnectionEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            ConnectionEvent::CredentialsUpdated(credentials) => {
                // At-least-once durability: persist on every rotation. A
                // failed write abandons the attempt rather than running on
                // credentials that would be lost across a restart.
                if let Err(e) = registry.credential_store().persist(id, &credentials).await {
                    error!(session = %id, error = %e, "credential persist failed, tearing down");
                    handle.close().await;
                    registry.apply_transition(
                        id,
                        attempt,
                        ConnectionStatus::Disconnected {
                            reason: DisconnectReason::Storage(e.to_string()),
                        },
                    );
                    return;
                }
                debug!(session = %id, "credentials persisted");
            }
            ConnectionEvent::QrIssued { challenge } => {
                // Challenges are single-use; a new one replaces whatever
                // the caller was previously shown.
                info!(session = %id, "QR challenge issued");
                registry.apply_transition(id, attempt, ConnectionStatus::QrPending { challenge });
            }
            ConnectionEvent::Opened => {
                info!(session = %id, connection = %handle.id(), "connection open");
                registry.apply_transition(id, attempt, ConnectionStatus::Connected);
            }
            ConnectionEvent::Closed { reason } => {
                info!(
                    session = %id,
                    %reason,
                    terminal = reason.is_terminal(),
                    "connection closed"
                );
                registry.apply_transition(
                    id,
                    attempt,
                    ConnectionStatus::Disconnected { reason },
                );
                return;
            }
        }
    }

    // The transport dropped the sender without a close event.
    warn!(session = %id, "event channel closed without a close event");
    registry.apply_transition(
        id,
        attempt,
        ConnectionStatus::Disconnected {
            reason: DisconnectReason::ConnectionLost("event channel closed".into()),
        },
    );
}
