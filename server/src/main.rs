use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wabridge_server::config::{Config, TransportMode};
use wabridge_server::connection::simulated::SimulatedTransport;
use wabridge_server::session::state::SessionConfig as SessionStateConfig;
use wabridge_server::{AppState, CredentialStore, SessionRegistry, Transport, session_routes};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Ensure a directory exists, creating it if necessary.
/// Returns true if directory exists and is empty.
fn ensure_directory(path: &Path, name: &str) -> std::io::Result<bool> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created {} directory: {:?}", name, path);
        Ok(true) // newly created, so empty
    } else if path.is_dir() {
        let is_empty = path.read_dir()?.next().is_none();
        Ok(is_empty)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} path {:?} exists but is not a directory", name, path),
        ))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    active_sessions: usize,
    uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.registry.active_count(),
        uptime_seconds: uptime,
    })
}

#[derive(Serialize)]
struct MetricsResponse {
    /// Server uptime in seconds
    uptime_seconds: u64,
    /// Server version
    version: &'static str,
    /// Number of identities with an attempt in flight or established
    active_sessions: usize,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    Json(MetricsResponse {
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.registry.active_count(),
    })
}

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Initialize the Prometheus metrics recorder
fn setup_prometheus_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    let handle = PROMETHEUS_HANDLE
        .get()
        .expect("Prometheus handle not initialized");
    handle.render()
}

/// Wait for SIGINT/SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Record server start time
    START_TIME.set(Instant::now()).ok();

    // Initialize Prometheus metrics recorder (must be done before any metrics are recorded)
    let prometheus_handle = setup_prometheus_metrics();
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wabridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}",
        config.host, config.port
    );

    // Ensure the credential directory exists (auto-create for dev-friendly startup)
    match ensure_directory(&config.credentials.dir, "credentials") {
        Ok(is_empty) => {
            if is_empty {
                info!(
                    "Credential directory {:?} is empty - every identity will pair from scratch",
                    config.credentials.dir
                );
            }
        }
        Err(e) => {
            warn!(
                "Failed to create credential directory {:?}: {}",
                config.credentials.dir, e
            );
        }
    }

    // Select the transport implementation
    let transport: Arc<dyn Transport> = match config.transport.mode {
        TransportMode::Simulated => {
            info!("Using simulated transport (no protocol engine attached)");
            Arc::new(SimulatedTransport::new(
                config.transport.sim_qr_delay,
                config.transport.sim_pair_delay,
            ))
        }
        TransportMode::Bridge => {
            // TODO: Implement BridgeTransport against the protocol sidecar
            info!("Bridge transport not yet implemented, falling back to simulated");
            Arc::new(SimulatedTransport::new(
                config.transport.sim_qr_delay,
                config.transport.sim_pair_delay,
            ))
        }
    };

    // Create the session registry shared by all request handlers
    let session_config = SessionStateConfig {
        max_sessions: config.session.max_sessions,
        event_buffer: config.session.event_buffer,
    };
    let credential_store = Arc::new(CredentialStore::new(config.credentials.dir.clone()));
    let registry = SessionRegistry::new(transport, credential_store, session_config);

    let app_state = AppState {
        registry: registry.clone(),
    };

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            metrics::gauge!("wabridge_sessions_active")
                .set(metrics_registry.active_count() as f64);

            let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
            metrics::gauge!("wabridge_uptime_seconds").set(uptime as f64);
        }
    });

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .nest("/api", session_routes())
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        );

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("WABridge server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close every live protocol connection before exiting so credential
    // state settles on disk.
    registry.shutdown().await;
    info!("WABridge server stopped");

    Ok(())
}
