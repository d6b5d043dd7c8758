//! HTTP route handlers for the session API

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::session::registry::{SessionRegistry, StartAck, StartError, StopError};
use crate::session::state::ConnectionStatus;

/// Header populated by the upstream auth layer with the verified user
/// identity. The session core trusts it and performs no authentication of
/// its own; deployments must not expose these routes without that layer.
pub const AUTH_USER_HEADER: &str = "x-auth-user";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
}

/// Error response for the session API
#[derive(Debug, Serialize)]
pub struct SessionErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<StartError> for SessionErrorResponse {
    fn from(e: StartError) -> Self {
        let code = match &e {
            StartError::InvalidIdentity => "invalid_identity",
            StartError::CapacityExceeded(_) => "capacity",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl From<StopError> for SessionErrorResponse {
    fn from(e: StopError) -> Self {
        Self {
            error: e.to_string(),
            code: "not_active".to_string(),
        }
    }
}

impl IntoResponse for SessionErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "invalid_identity" => StatusCode::BAD_REQUEST,
            "not_active" => StatusCode::CONFLICT,
            "capacity" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Pull the verified identity out of the auth header. A missing or
/// unreadable header is the same client error as a malformed identity;
/// full validation happens in the registry.
fn identity(headers: &HeaderMap) -> Result<String, SessionErrorResponse> {
    headers
        .get(AUTH_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SessionErrorResponse {
            error: format!("missing or unreadable {AUTH_USER_HEADER} header"),
            code: "invalid_identity".to_string(),
        })
}

/// Response for POST /api/session/start
#[derive(Debug, Serialize)]
pub struct StartResponse {
    /// Always true on success; the connection itself settles later
    pub accepted: bool,
    /// Whether an attempt was already in flight for this identity
    pub already_active: bool,
}

/// POST /api/session/start - acknowledge a start request
///
/// Returns 202 before the handshake completes; callers poll the status
/// endpoint until the session is connected or disconnected.
pub async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<StartResponse>), SessionErrorResponse> {
    let id = identity(&headers)?;
    let ack = state.registry.start_session(&id).map_err(|e| {
        tracing::warn!(session = %id, "session start rejected: {}", e);
        SessionErrorResponse::from(e)
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            accepted: true,
            already_active: ack == StartAck::AlreadyActive,
        }),
    ))
}

/// GET /api/session/status - current connection status
///
/// Non-blocking read; includes the QR challenge payload while pairing is
/// pending so the caller can render it for scanning.
pub async fn session_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConnectionStatus>, SessionErrorResponse> {
    let id = identity(&headers)?;
    Ok(Json(state.registry.status(&id)))
}

/// Response for POST /api/session/stop
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

/// POST /api/session/stop - deterministically tear down an active session
pub async fn stop_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StopResponse>, SessionErrorResponse> {
    let id = identity(&headers)?;
    state.registry.stop_session(&id).await.map_err(|e| {
        tracing::debug!(session = %id, "session stop rejected: {}", e);
        SessionErrorResponse::from(e)
    })?;

    Ok(Json(StopResponse { stopped: true }))
}

/// Build the session API router
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/status", get(session_status))
        .route("/session/stop", post(stop_session))
}
