//! In-process simulated transport for development and demos.
//!
//! Plays out a realistic pairing flow without a protocol engine: an
//! unpaired identity gets a QR challenge, then fabricated device
//! credentials and an open; a paired identity opens directly. Production
//! deployments use the bridge transport instead (see `main.rs`).

use crate::connection::credentials::Credentials;
use crate::connection::transport::{ConnectionHandle, Transport, TransportError};
use crate::session::state::{ConnectionEvent, DisconnectReason, SessionId, now_millis};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub struct SimulatedTransport {
    /// Delay before the QR challenge is issued to an unpaired identity
    qr_delay: Duration,
    /// Delay simulating the user scanning the challenge
    pair_delay: Duration,
}

impl SimulatedTransport {
    pub fn new(qr_delay: Duration, pair_delay: Duration) -> Self {
        Self {
            qr_delay,
            pair_delay,
        }
    }
}

struct SimulatedHandle {
    id: Uuid,
    events: mpsc::Sender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionHandle for SimulatedHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self
                .events
                .send(ConnectionEvent::Closed {
                    reason: DisconnectReason::ConnectionLost("closed by local endpoint".into()),
                })
                .await;
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        credentials: Credentials,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
        let closed = Arc::new(AtomicBool::new(false));
        let handle = Arc::new(SimulatedHandle {
            id: Uuid::new_v4(),
            events: events.clone(),
            closed: closed.clone(),
        });

        debug!(session = %session_id, paired = !credentials.is_empty(), "simulated connect");
        tokio::spawn(drive(
            credentials,
            events,
            closed,
            self.qr_delay,
            self.pair_delay,
        ));

        Ok(handle)
    }
}

/// Emit the scripted event sequence for one connection. Gives up silently
/// once the handle is closed or the receiver is gone.
async fn drive(
    credentials: Credentials,
    events: mpsc::Sender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
    qr_delay: Duration,
    pair_delay: Duration,
) {
    if credentials.is_empty() {
        tokio::time::sleep(qr_delay).await;
        if closed.load(Ordering::SeqCst) {
            return;
        }
        let challenge = format!("wab-pair-{}", Uuid::new_v4());
        if events
            .send(ConnectionEvent::QrIssued { challenge })
            .await
            .is_err()
        {
            return;
        }

        tokio::time::sleep(pair_delay).await;
        if closed.load(Ordering::SeqCst) {
            return;
        }
        let device = Credentials(json!({
            "device_id": Uuid::new_v4(),
            "paired_at": now_millis(),
        }));
        if events
            .send(ConnectionEvent::CredentialsUpdated(device))
            .await
            .is_err()
        {
            return;
        }
    } else {
        tokio::time::sleep(qr_delay).await;
        if closed.load(Ordering::SeqCst) {
            return;
        }
    }

    let _ = events.send(ConnectionEvent::Opened).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> SimulatedTransport {
        SimulatedTransport::new(Duration::from_millis(5), Duration::from_millis(5))
    }

    async fn collect(mut rx: mpsc::Receiver<ConnectionEvent>, count: usize) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        for _ in 0..count {
            events.push(rx.recv().await.expect("event stream ended early"));
        }
        events
    }

    #[tokio::test]
    async fn test_unpaired_flow_is_qr_then_credentials_then_open() {
        let transport = fast();
        let (tx, rx) = mpsc::channel(8);
        let _handle = transport
            .connect(&"u1".to_string(), Credentials::empty(), tx)
            .await
            .unwrap();

        let events = collect(rx, 3).await;
        assert!(matches!(
            &events[0],
            ConnectionEvent::QrIssued { challenge } if challenge.starts_with("wab-pair-")
        ));
        assert!(matches!(&events[1], ConnectionEvent::CredentialsUpdated(c) if !c.is_empty()));
        assert!(matches!(events[2], ConnectionEvent::Opened));
    }

    #[tokio::test]
    async fn test_paired_flow_skips_pairing() {
        let transport = fast();
        let (tx, rx) = mpsc::channel(8);
        let _handle = transport
            .connect(
                &"u1".to_string(),
                Credentials(json!({"device_id": "d1"})),
                tx,
            )
            .await
            .unwrap();

        let events = collect(rx, 1).await;
        assert!(matches!(events[0], ConnectionEvent::Opened));
    }

    #[tokio::test]
    async fn test_close_emits_exactly_one_closed_event() {
        let transport = fast();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = transport
            .connect(&"u1".to_string(), Credentials(json!({"device_id": "d1"})), tx)
            .await
            .unwrap();

        handle.close().await;
        handle.close().await;

        let mut closed_events = 0;
        while let Ok(event) =
            tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
        {
            match event {
                Some(ConnectionEvent::Closed { .. }) => closed_events += 1,
                Some(_) => {}
                None => break,
            }
        }
        assert_eq!(closed_events, 1);
    }
}
