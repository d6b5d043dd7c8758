//! Server configuration
//!
//! Configuration is loaded from environment variables; every knob has a
//! dev-friendly default.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which transport implementation drives protocol connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// In-process simulated transport (development/demo)
    Simulated,
    /// External protocol bridge sidecar
    Bridge,
}

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Transport configuration
    pub transport: TransportConfig,

    /// Credential storage configuration
    pub credentials: CredentialsConfig,

    /// Session registry configuration
    pub session: SessionConfig,
}

/// Transport-related configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Simulated transport: delay before the QR challenge is issued
    pub sim_qr_delay: Duration,
    /// Simulated transport: delay simulating the user's scan
    pub sim_pair_delay: Duration,
}

/// Credential-storage configuration
#[derive(Debug, Clone)]
pub struct CredentialsConfig {
    /// Directory holding one credential blob per identity
    pub dir: PathBuf,
}

/// Session-registry configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of tracked identities
    pub max_sessions: usize,
    /// Depth of the per-connection lifecycle event channel
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            transport: TransportConfig::default(),
            credentials: CredentialsConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Simulated,
            sim_qr_delay: Duration::from_millis(500),
            sim_pair_delay: Duration::from_secs(5),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/wabridge/credentials"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 500,
            event_buffer: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Transport config
        if let Ok(mode) = env::var("TRANSPORT_MODE") {
            config.transport.mode = match mode.to_lowercase().as_str() {
                "bridge" => TransportMode::Bridge,
                _ => TransportMode::Simulated,
            };
        }
        if let Ok(val) = env::var("SIM_QR_DELAY_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.transport.sim_qr_delay = Duration::from_millis(ms);
        }
        if let Ok(val) = env::var("SIM_PAIR_DELAY_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.transport.sim_pair_delay = Duration::from_millis(ms);
        }

        // Credential storage config
        if let Ok(dir) = env::var("CREDENTIALS_DIR")
            && !dir.is_empty()
        {
            config.credentials.dir = PathBuf::from(dir);
        }

        // Session config
        if let Ok(val) = env::var("MAX_SESSIONS")
            && let Ok(v) = val.parse()
        {
            config.session.max_sessions = v;
        }
        if let Ok(val) = env::var("SESSION_EVENT_BUFFER")
            && let Ok(v) = val.parse()
        {
            config.session.event_buffer = v;
        }

        config
    }
}
