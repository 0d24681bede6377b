//! Sink that renders telemetry as structured log events.
//!
//! Records are emitted under the `vaktr::telemetry` target so they can be
//! routed separately from the agent's own diagnostics with an `EnvFilter`
//! directive such as `vaktr::telemetry=info`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{SinkError, SinkFactory, TelemetrySink};
use crate::models::{ExceptionDetails, HealthState, Tags, TraceSeverity};

macro_rules! telemetry_event {
    ($severity:expr, $($arg:tt)+) => {
        match $severity {
            TraceSeverity::Verbose => tracing::debug!(target: "vaktr::telemetry", $($arg)+),
            TraceSeverity::Information => tracing::info!(target: "vaktr::telemetry", $($arg)+),
            TraceSeverity::Warning => tracing::warn!(target: "vaktr::telemetry", $($arg)+),
            TraceSeverity::Error | TraceSeverity::Critical => {
                tracing::error!(target: "vaktr::telemetry", $($arg)+)
            }
        }
    };
}

/// Text of the trace emitted for a health observation.
#[must_use]
pub fn health_message(source: &str, property: &str, state: HealthState) -> String {
    format!("Health report: {source}:{property} is {state}")
}

/// Logs every record through `tracing`.
#[derive(Debug, Clone)]
pub struct TracingSink {
    sink_id: String,
}

impl TracingSink {
    /// Creates a sink identified by a masked form of `credential`.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::InvalidCredential` if the credential is blank.
    pub fn new(credential: &str) -> Result<Self, SinkError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(SinkError::InvalidCredential(
                "credential must not be blank".to_string(),
            ));
        }
        Ok(Self {
            sink_id: mask(credential),
        })
    }

    /// Masked credential identifying this sink in log output.
    #[must_use]
    pub fn sink_id(&self) -> &str {
        &self.sink_id
    }
}

fn mask(credential: &str) -> String {
    let visible: String = credential
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{visible}")
}

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn report_trace(
        &self,
        message: String,
        severity: TraceSeverity,
        tags: Tags,
    ) -> Result<(), SinkError> {
        telemetry_event!(severity, sink = %self.sink_id, kind = "trace", ?tags, "{message}");
        Ok(())
    }

    async fn report_metric(&self, name: String, value: f64, tags: Tags) -> Result<(), SinkError> {
        tracing::info!(
            target: "vaktr::telemetry",
            sink = %self.sink_id,
            kind = "metric",
            metric = %name,
            value,
            ?tags,
            "Metric sampled"
        );
        Ok(())
    }

    async fn report_exception(
        &self,
        error: ExceptionDetails,
        tags: Tags,
    ) -> Result<(), SinkError> {
        tracing::error!(
            target: "vaktr::telemetry",
            sink = %self.sink_id,
            kind = "exception",
            ?tags,
            "{error}"
        );
        Ok(())
    }

    async fn report_availability(
        &self,
        app_name: String,
        test_name: String,
        captured_at: DateTime<Utc>,
        success: bool,
        message: Option<String>,
    ) -> Result<(), SinkError> {
        let severity = if success {
            TraceSeverity::Information
        } else {
            TraceSeverity::Error
        };
        telemetry_event!(
            severity,
            sink = %self.sink_id,
            kind = "availability",
            app = %app_name,
            test = %test_name,
            captured_at = %captured_at.to_rfc3339(),
            success,
            message = message.as_deref().unwrap_or(""),
            "Availability result"
        );
        Ok(())
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
        let text = health_message(&source, &property, state);
        telemetry_event!(
            TraceSeverity::from(state),
            sink = %self.sink_id,
            kind = "health",
            app = %app_name,
            role_name = %service_name,
            role_instance = %instance,
            "{text}"
        );
        Ok(())
    }
}

/// Creates a `TracingSink` per credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSinkFactory;

impl SinkFactory for TracingSinkFactory {
    fn create(&self, credential: &str) -> Result<Arc<dyn TelemetrySink>, SinkError> {
        Ok(Arc::new(TracingSink::new(credential)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TelemetryRecord;

    #[test]
    fn test_health_message() {
        assert_eq!(
            health_message("System.FM", "State", HealthState::Warning),
            "Health report: System.FM:State is Warning"
        );
    }

    #[test]
    fn test_credential_is_masked() {
        let sink = TracingSink::new("0123-abcd-wxyz").unwrap();
        assert_eq!(sink.sink_id(), "***wxyz");

        let short = TracingSink::new("ab").unwrap();
        assert_eq!(short.sink_id(), "***ab");
    }

    #[test]
    fn test_blank_credential_rejected() {
        assert!(matches!(
            TracingSink::new("   "),
            Err(SinkError::InvalidCredential(_))
        ));
        assert!(TracingSinkFactory.create("").is_err());
    }

    #[tokio::test]
    async fn test_reports_every_kind() {
        let sink = TracingSinkFactory.create("key-1234").unwrap();

        let records = vec![
            TelemetryRecord::trace("hello", TraceSeverity::Warning),
            TelemetryRecord::metric("CPU", 3.5),
            TelemetryRecord::Exception {
                error: ExceptionDetails::message("boom"),
                tags: Tags::new(),
            },
            TelemetryRecord::availability("app", "Vaktr Watchdog", false, Some("down".into())),
            TelemetryRecord::Health {
                app_name: "app".into(),
                service_name: "svc".into(),
                instance: "1".into(),
                source: "src".into(),
                property: "prop".into(),
                state: HealthState::Error,
            },
        ];

        for record in records {
            assert!(sink.report(record).await.is_ok());
        }
    }
}
