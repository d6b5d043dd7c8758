//! WABridge Server Library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod config;
pub mod connection;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use connection::credentials::CredentialStore;
pub use connection::transport::{ConnectionHandle, Transport};
pub use server::{AppState, session_routes};
pub use session::registry::SessionRegistry;
pub use session::state::ConnectionStatus;
