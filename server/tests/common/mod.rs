//! Shared fixtures for integration tests
//!
//! Provides a scriptable transport double plus helpers for driving the
//! session API router in-process with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use uuid::Uuid;
use wabridge_server::connection::credentials::Credentials;
use wabridge_server::connection::transport::TransportError;
use wabridge_server::server::routes::AUTH_USER_HEADER;
use wabridge_server::session::state::{ConnectionEvent, SessionConfig, SessionId};
use wabridge_server::{
    AppState, ConnectionHandle, CredentialStore, SessionRegistry, Transport, session_routes,
};

pub struct ScriptedHandle {
    id: Uuid,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ConnectionHandle for ScriptedHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport double: hands out inert handles and keeps each connection's
/// event sender so tests can inject lifecycle events per identity.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    senders: HashMap<String, mpsc::Sender<ConnectionEvent>>,
    connect_counts: HashMap<String, usize>,
    handle_closed: HashMap<String, Arc<AtomicBool>>,
}

impl ScriptedTransport {
    pub fn connect_count(&self, id: &str) -> usize {
        *self
            .state
            .lock()
            .unwrap()
            .connect_counts
            .get(id)
            .unwrap_or(&0)
    }

    pub fn handle_closed(&self, id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .handle_closed
            .get(id)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub async fn emit(&self, id: &str, event: ConnectionEvent) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .senders
            .get(id)
            .cloned()
            .expect("no connection for identity");
        sender.send(event).await.expect("event channel closed");
    }

    /// Wait until the registry's lifecycle task has reached connect.
    pub async fn wait_for_connect(&self, id: &str) {
        wait_until(|| self.connect_count(id) > 0).await;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        session_id: &SessionId,
        _credentials: Credentials,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
        let mut state = self.state.lock().unwrap();
        *state.connect_counts.entry(session_id.clone()).or_insert(0) += 1;

        let closed = Arc::new(AtomicBool::new(false));
        state.senders.insert(session_id.clone(), events);
        state
            .handle_closed
            .insert(session_id.clone(), closed.clone());
        Ok(Arc::new(ScriptedHandle {
            id: Uuid::new_v4(),
            closed,
        }))
    }
}

/// Test context holding the router and its collaborators
pub struct TestContext {
    pub router: Router,
    pub registry: SessionRegistry,
    pub transport: Arc<ScriptedTransport>,
    // Held so the credential directory outlives the test
    _credentials_dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let credentials_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let transport = Arc::new(ScriptedTransport::default());
        let registry = SessionRegistry::new(
            transport.clone(),
            Arc::new(CredentialStore::new(credentials_dir.path())),
            SessionConfig::default(),
        );
        let router = Router::new()
            .nest("/api", session_routes())
            .with_state(AppState {
                registry: registry.clone(),
            });

        Self {
            router,
            registry,
            transport,
            _credentials_dir: credentials_dir,
        }
    }

    /// Fire one request as `identity` and return the response.
    pub async fn request(&self, method: &str, uri: &str, identity: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = identity {
            builder = builder.header(AUTH_USER_HEADER, id);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Fire one request and decode the JSON body, asserting the status.
    pub async fn request_json(
        &self,
        method: &str,
        uri: &str,
        identity: Option<&str>,
        expected: StatusCode,
    ) -> serde_json::Value {
        let response = self.request(method, uri, identity).await;
        assert_eq!(response.status(), expected);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}

/// Poll until `predicate` holds, failing the test after ~1s.
pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not met within 1s");
}
