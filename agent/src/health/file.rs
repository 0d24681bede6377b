//! Health client backed by a JSON snapshot on disk.
//!
//! The snapshot is re-read on every query, so whatever writes it (a cluster
//! exporter, a cron job, a test) controls what the agent reports.

use async_trait::async_trait;
use shared::models::ClusterHealth;
use shared::swap::Dispose;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{HealthClient, HealthClientFactory, HealthQueryError};

/// Reads `ClusterHealth` documents from a file.
#[derive(Debug)]
pub struct SnapshotFileHealthClient {
    path: PathBuf,
    closed: AtomicBool,
}

impl SnapshotFileHealthClient {
    /// Creates a client for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// Snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HealthClient for SnapshotFileHealthClient {
    async fn cluster_health(&self) -> Result<ClusterHealth, HealthQueryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HealthQueryError::HandleClosed);
        }

        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| HealthQueryError::Query(format!("{}: {e}", self.path.display())))?;

        serde_json::from_str(&text)
            .map_err(|e| HealthQueryError::Query(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Dispose for SnapshotFileHealthClient {
    async fn dispose(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(path = %self.path.display(), "Health snapshot client closed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Creates `SnapshotFileHealthClient`s for one path.
#[derive(Debug, Clone)]
pub struct SnapshotFileHealthClientFactory {
    path: PathBuf,
}

impl SnapshotFileHealthClientFactory {
    /// Creates a factory for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HealthClientFactory for SnapshotFileHealthClientFactory {
    fn create(&self) -> Result<Box<dyn HealthClient>, HealthQueryError> {
        Ok(Box::new(SnapshotFileHealthClient::new(self.path.clone())))
    }
}
