//! Disposable sink handle.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{SinkError, TelemetrySink};
use crate::models::TelemetryRecord;
use crate::swap::Dispose;

/// The agent's owning reference to a sink.
///
/// Every report holds a lease for its whole duration; disposal waits for
/// outstanding leases, flushes the sink once, and from then on every report
/// is abandoned with `SinkError::Disposed`.
pub struct SinkHandle {
    sink: Arc<dyn TelemetrySink>,
    leases: RwLock<()>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("enabled", &self.sink.is_enabled())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl SinkHandle {
    /// Wraps a sink.
    #[must_use]
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            leases: RwLock::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Whether reports currently reach the sink.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst) && self.sink.is_enabled()
    }

    /// Reports a record.
    ///
    /// A disabled sink is skipped entirely and counts as success.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Disposed` if the handle was disposed, or whatever
    /// the sink itself reports.
    pub async fn report(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        let _lease = self.leases.read().await;
        if self.disposed.load(Ordering::SeqCst) {
            tracing::debug!(kind = record.kind(), "Abandoning report on disposed sink");
            return Err(SinkError::Disposed);
        }
        if !self.sink.is_enabled() {
            return Ok(());
        }
        self.sink.report(record).await
    }
}

#[async_trait]
impl Dispose for SinkHandle {
    async fn dispose(&self) {
        let _exclusive = self.leases.write().await;
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sink.flush().await {
            tracing::warn!(error = %e, "Failed to flush sink during disposal");
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
