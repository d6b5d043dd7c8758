//! Durable per-identity credential storage.
//!
//! One JSON blob per identity under a root directory. The blob is opaque
//! authentication material handed to us by the transport; it survives
//! process restarts so a paired identity can reconnect without re-scanning
//! a QR challenge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Credential storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read credentials: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write credentials: {0}")]
    Write(#[source] std::io::Error),

    #[error("corrupt credential blob: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Opaque authentication material emitted by the protocol library. The
/// session layer never inspects the contents; it only round-trips the blob
/// between the transport and disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub Value);

impl Credentials {
    /// Fresh state for an identity that has never paired.
    pub fn empty() -> Self {
        Credentials(Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }
}

/// Filesystem-backed credential store, addressable by session ID.
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    // Session IDs are validated to a path-safe charset before any store
    // call, so joining them directly is fine.
    fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    /// Read the stored blob, or hand back an empty one for a first-time
    /// identity. Any read error other than not-found is fatal to the
    /// caller's start attempt.
    pub async fn load_or_init(&self, id: &str) -> Result<Credentials, StorageError> {
        match tokio::fs::read(self.blob_path(id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::Corrupt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(session = %id, "no stored credentials, starting unpaired");
                Ok(Credentials::empty())
            }
            Err(e) => Err(StorageError::Read(e)),
        }
    }

    /// Persist the full blob. Written to a sibling temp file and renamed,
    /// so a crash mid-write leaves the previous blob intact; losing the
    /// very latest rotation only forces a re-pair, never corruption.
    pub async fn persist(&self, id: &str, credentials: &Credentials) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(StorageError::Write)?;

        let bytes = serde_json::to_vec_pretty(credentials).map_err(StorageError::Corrupt)?;
        let tmp = self.root.join(format!("{id}.json.tmp"));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(StorageError::Write)?;
        tokio::fs::rename(&tmp, self.blob_path(id))
            .await
            .map_err(StorageError::Write)?;
        Ok(())
    }
}
