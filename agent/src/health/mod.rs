//! Cluster health polling.
//!
//! - [`poll`] - `HealthPollLoop`, which reports per-application availability
//! - [`file`] - a client that reads a cluster health snapshot from disk
//! - [`memory`] - an in-memory client for tests and embedding

pub mod file;
pub mod memory;
pub mod poll;

pub use file::{SnapshotFileHealthClient, SnapshotFileHealthClientFactory};
pub use memory::{MemoryHealthClient, MemoryHealthClientFactory};
pub use poll::{HealthLoopError, HealthPollLoop, TickOutcome, AVAILABILITY_TEST_NAME};

use async_trait::async_trait;
use shared::models::ClusterHealth;
use shared::swap::Dispose;
use thiserror::Error;

/// Errors returned by health queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthQueryError {
    /// The client handle was closed by its owner and must be replaced.
    #[error("Health client handle has been closed")]
    HandleClosed,

    /// The query itself failed.
    #[error("Health query failed: {0}")]
    Query(String),

    /// No client could be created.
    #[error("Failed to create health client: {0}")]
    Connect(String),
}

/// Handle used to query aggregate cluster health.
///
/// Disposing the handle closes it; later queries fail with
/// `HealthQueryError::HandleClosed`.
#[async_trait]
pub trait HealthClient: Dispose {
    /// Queries the aggregate health of the cluster.
    ///
    /// # Errors
    ///
    /// Returns `HealthQueryError::HandleClosed` if the handle was closed, or
    /// `HealthQueryError::Query` if the query failed.
    async fn cluster_health(&self) -> Result<ClusterHealth, HealthQueryError>;
}

/// Creates health client handles.
pub trait HealthClientFactory: Send + Sync {
    /// Creates a new handle.
    ///
    /// # Errors
    ///
    /// Returns `HealthQueryError::Connect` if no handle can be created.
    fn create(&self) -> Result<Box<dyn HealthClient>, HealthQueryError>;
}

/// A health client installed in the poll loop's slot.
pub struct HealthClientHandle {
    id: u64,
    client: Box<dyn HealthClient>,
}

impl std::fmt::Debug for HealthClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthClientHandle")
            .field("id", &self.id)
            .field("disposed", &self.client.is_disposed())
            .finish()
    }
}

impl HealthClientHandle {
    pub(crate) fn new(id: u64, client: Box<dyn HealthClient>) -> Self {
        Self { id, client }
    }

    /// Sequence number of this handle, starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The wrapped client.
    #[must_use]
    pub fn client(&self) -> &dyn HealthClient {
        self.client.as_ref()
    }
}

#[async_trait]
impl Dispose for HealthClientHandle {
    async fn dispose(&self) {
        self.client.dispose().await;
    }

    fn is_disposed(&self) -> bool {
        self.client.is_disposed()
    }
}
