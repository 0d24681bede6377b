//! In-memory sink.
//!
//! Keeps every reported record so callers can inspect what would have been
//! sent. Used by the agent's tests and by the CLI's `sample` command.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{SinkError, SinkFactory, TelemetrySink};
use crate::models::{ExceptionDetails, HealthState, Tags, TelemetryRecord, TraceSeverity};

/// Sink that records every report in order.
#[derive(Debug)]
pub struct MemorySink {
    credential: String,
    records: Mutex<Vec<TelemetryRecord>>,
    enabled: AtomicBool,
    flushes: AtomicUsize,
    after_flush: AtomicUsize,
    report_delay: Option<Duration>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Creates an enabled, empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::with_credential("")
    }

    /// Creates an enabled, empty sink remembering the credential it was built from.
    #[must_use]
    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            records: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
            flushes: AtomicUsize::new(0),
            after_flush: AtomicUsize::new(0),
            report_delay: None,
        }
    }

    /// Makes every report take `delay` before it is recorded.
    #[must_use]
    pub fn with_report_delay(mut self, delay: Duration) -> Self {
        self.report_delay = Some(delay);
        self
    }

    /// Credential this sink was created with.
    #[must_use]
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Enables or disables the sink.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Snapshot of every record reported so far.
    #[must_use]
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.lock().clone()
    }

    /// Removes and returns every record reported so far.
    pub fn take(&self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut *self.lock())
    }

    /// Reported metrics as `(name, value)` pairs.
    #[must_use]
    pub fn metrics(&self) -> Vec<(String, f64)> {
        self.lock()
            .iter()
            .filter_map(|record| match record {
                TelemetryRecord::Metric { name, value, .. } => Some((name.clone(), *value)),
                _ => None,
            })
            .collect()
    }

    /// Number of times the sink was flushed.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Number of records that arrived after the first flush.
    #[must_use]
    pub fn reported_after_flush(&self) -> usize {
        self.after_flush.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn push(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        if let Some(delay) = self.report_delay {
            tokio::time::sleep(delay).await;
        }
        if self.flush_count() > 0 {
            self.after_flush.fetch_add(1, Ordering::SeqCst);
        }
        self.lock().push(record);
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn report_trace(
        &self,
        message: String,
        severity: TraceSeverity,
        tags: Tags,
    ) -> Result<(), SinkError> {
        self.push(TelemetryRecord::Trace {
            message,
            severity,
            tags,
        })
        .await
    }

    async fn report_metric(&self, name: String, value: f64, tags: Tags) -> Result<(), SinkError> {
        self.push(TelemetryRecord::Metric { name, value, tags }).await
    }

    async fn report_exception(
        &self,
        error: ExceptionDetails,
        tags: Tags,
    ) -> Result<(), SinkError> {
        self.push(TelemetryRecord::Exception { error, tags }).await
    }

    async fn report_availability(
        &self,
        app_name: String,
        test_name: String,
        captured_at: DateTime<Utc>,
        success: bool,
        message: Option<String>,
    ) -> Result<(), SinkError> {
        self.push(TelemetryRecord::Availability {
            app_name,
            test_name,
            captured_at,
            success,
            message,
        })
        .await
    }

    async fn report_health(
        &self,
        app_name: String,
        service_name: String,
        instance: String,
        source: String,
        property: String,
        state: HealthState,
    ) -> Result<(), SinkError> {
        self.push(TelemetryRecord::Health {
            app_name,
            service_name,
            instance,
            source,
            property,
            state,
        })
        .await
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that builds a fresh `MemorySink` per credential and keeps them all.
#[derive(Debug, Default)]
pub struct MemorySinkFactory {
    created: Mutex<Vec<Arc<MemorySink>>>,
    report_delay: Option<Duration>,
}

impl MemorySinkFactory {
    /// Creates a factory that has built nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every sink with [`MemorySink::with_report_delay`].
    #[must_use]
    pub fn with_report_delay(mut self, delay: Duration) -> Self {
        self.report_delay = Some(delay);
        self
    }

    /// Every sink built so far, oldest first.
    #[must_use]
    pub fn created(&self) -> Vec<Arc<MemorySink>> {
        self.lock().clone()
    }

    /// The most recently built sink.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<MemorySink>> {
        self.lock().last().cloned()
    }

    /// Number of sinks built so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of built sinks that have been flushed at least once.
    #[must_use]
    pub fn flushed_count(&self) -> usize {
        self.lock().iter().filter(|s| s.flush_count() > 0).count()
    }

    /// Records reported to every sink, in creation order.
    #[must_use]
    pub fn all_records(&self) -> Vec<TelemetryRecord> {
        self.lock().iter().flat_map(|s| s.records()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<MemorySink>>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SinkFactory for MemorySinkFactory {
    fn create(&self, credential: &str) -> Result<Arc<dyn TelemetrySink>, SinkError> {
        if credential.trim().is_empty() {
            return Err(SinkError::InvalidCredential(
                "credential must not be blank".to_string(),
            ));
        }
        let mut sink = MemorySink::with_credential(credential);
        sink.report_delay = self.report_delay;
        let sink = Arc::new(sink);
        self.lock().push(Arc::clone(&sink));
        Ok(sink)
    }
}
