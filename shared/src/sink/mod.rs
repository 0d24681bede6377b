//! Telemetry sinks.
//!
//! This module defines the `TelemetrySink` interface the agent reports
//! through, the disposable `SinkHandle` the agent actually holds, and two
//! implementations: `TracingSink`, which renders records as structured log
//! events, and `MemorySink`, which records them for inspection.

pub mod handle;
pub mod memory;
pub mod tracing_sink;

pub use handle::SinkHandle;
pub use memory::{MemorySink, MemorySinkFactory};
pub use tracing_sink::{TracingSink, TracingSinkFactory};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{ExceptionDetails, HealthState, Tags, TelemetryRecord, TraceSeverity};

/// Errors that can occur when reporting telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The handle was disposed; the report was abandoned.
    #[error("Sink handle has been disposed")]
    Disposed,

    /// The sink could not be created from the supplied credential.
    #[error("Invalid sink credential: {0}")]
    InvalidCredential(String),

    /// The sink failed to accept the record.
    #[error("Sink transport error: {0}")]
    Transport(String),
}

/// Receiver of telemetry records.
///
/// Every report is asynchronous. Callers never retry; transport failures are
/// the sink's own concern.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Whether the sink currently accepts telemetry. When false, callers skip reporting.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Reports a trace message.
    async fn report_trace(
        &self,
        message: String,
        severity: TraceSeverity,
        tags: Tags,
    ) -> Result<(), SinkError>;

    /// Reports a metric value.
    async fn report_metric(&self, name: String, value: f64, tags: Tags) -> Result<(), SinkError>;

    /// Reports an error observed by the agent.
    async fn report_exception(&self, error: ExceptionDetails, tags: Tags)
        -> Result<(), SinkError>;

    /// Reports an availability test result.
    async fn report_availability(
        &self,
        app_name: String,
        test_name: String,
        captured_at: DateTime<Utc>,
        success: bool,
        message: Option<String>,
    ) -> Result<(), SinkError>;

    /// Reports a service health observation.
    async fn report_health(
        &self,
        app_name: String,
        service_name: String,
        instance: String,
        source: String,
        property: String,
        state: HealthState,
    ) -> Result<(), SinkError>;

    /// Flushes anything buffered. Called once when the owning handle is disposed.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Reports any record by dispatching to the matching operation.
    async fn report(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        match record {
            TelemetryRecord::Trace {
                message,
                severity,
                tags,
            } => self.report_trace(message, severity, tags).await,
            TelemetryRecord::Metric { name, value, tags } => {
                self.report_metric(name, value, tags).await
            }
            TelemetryRecord::Exception { error, tags } => self.report_exception(error, tags).await,
            TelemetryRecord::Availability {
                app_name,
                test_name,
                captured_at,
                success,
                message,
            } => {
                self.report_availability(app_name, test_name, captured_at, success, message)
                    .await
            }
            TelemetryRecord::Health {
                app_name,
                service_name,
                instance,
                source,
                property,
                state,
            } => {
                self.report_health(app_name, service_name, instance, source, property, state)
                    .await
            }
        }
    }
}

/// Builds sinks from a credential.
pub trait SinkFactory: Send + Sync {
    /// Creates a sink for `credential`.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::InvalidCredential` if the credential is unusable.
    fn create(&self, credential: &str) -> Result<Arc<dyn TelemetrySink>, SinkError>;
}
