//! Telemetry record model.
//!
//! Defines `TelemetryRecord`, the uniform shape every sampled counter, watched
//! event, and health observation is turned into before it reaches a sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::health::HealthState;

/// Free-form key/value metadata attached to traces, metrics, and exceptions.
pub type Tags = HashMap<String, String>;

/// Severity of a trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceSeverity {
    /// Verbose diagnostic output.
    Verbose,
    /// Informational messages.
    Information,
    /// Warning conditions.
    Warning,
    /// Error conditions.
    Error,
    /// Critical conditions.
    Critical,
}

impl std::fmt::Display for TraceSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verbose => write!(f, "verbose"),
            Self::Information => write!(f, "information"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl From<HealthState> for TraceSeverity {
    fn from(state: HealthState) -> Self {
        match state {
            HealthState::Error => Self::Error,
            HealthState::Warning => Self::Warning,
            HealthState::Ok | HealthState::Unknown => Self::Information,
        }
    }
}

/// A captured error, flattened so it can outlive the error value it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionDetails {
    /// Top-level error message.
    pub message: String,
    /// Messages of the underlying causes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ExceptionDetails {
    /// Captures an error and its `source()` chain.
    #[must_use]
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: error.to_string(),
            causes,
        }
    }

    /// Creates exception details from a bare message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
        }
    }
}

impl std::fmt::Display for ExceptionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// One unit of telemetry handed to a sink.
///
/// Records are built per tick or per event and consumed exactly once by the
/// sink; nothing in the agent keeps a record after reporting it.
///
/// # Example
///
/// ```
/// use shared::models::{TelemetryRecord, TraceSeverity};
///
/// let record = TelemetryRecord::trace("disk failure", TraceSeverity::Error)
///     .with_tag("Source", "disk");
///
/// assert_eq!(record.kind(), "trace");
/// assert_eq!(record.tags().and_then(|t| t.get("Source")).map(String::as_str), Some("disk"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    /// A free-text trace message.
    Trace {
        /// The message text.
        message: String,
        /// Severity of the message.
        severity: TraceSeverity,
        /// Additional metadata.
        #[serde(default)]
        tags: Tags,
    },
    /// A single numeric measurement.
    Metric {
        /// Metric name (the counter's friendly name).
        name: String,
        /// Sampled value.
        value: f64,
        /// Additional metadata.
        #[serde(default)]
        tags: Tags,
    },
    /// An error observed by the agent itself.
    Exception {
        /// The captured error.
        error: ExceptionDetails,
        /// Additional metadata.
        #[serde(default)]
        tags: Tags,
    },
    /// Result of an availability test for one application.
    Availability {
        /// Application the test ran against.
        app_name: String,
        /// Name of the test.
        test_name: String,
        /// When the result was captured.
        captured_at: DateTime<Utc>,
        /// Whether the application was considered available.
        success: bool,
        /// Optional explanation, typically set on failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A health observation for one service instance.
    Health {
        /// Owning application.
        app_name: String,
        /// Service name.
        service_name: String,
        /// Instance identifier.
        instance: String,
        /// Health report source.
        source: String,
        /// Health report property.
        property: String,
        /// Reported state.
        state: HealthState,
    },
}

impl TelemetryRecord {
    /// Creates a trace record without tags.
    #[must_use]
    pub fn trace(message: impl Into<String>, severity: TraceSeverity) -> Self {
        Self::Trace {
            message: message.into(),
            severity,
            tags: Tags::new(),
        }
    }

    /// Creates a metric record without tags.
    #[must_use]
    pub fn metric(name: impl Into<String>, value: f64) -> Self {
        Self::Metric {
            name: name.into(),
            value,
            tags: Tags::new(),
        }
    }

    /// Creates an exception record from any error.
    #[must_use]
    pub fn exception(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::Exception {
            error: ExceptionDetails::from_error(error),
            tags: Tags::new(),
        }
    }

    /// Creates an availability record captured now.
    #[must_use]
    pub fn availability(
        app_name: impl Into<String>,
        test_name: impl Into<String>,
        success: bool,
        message: Option<String>,
    ) -> Self {
        Self::Availability {
            app_name: app_name.into(),
            test_name: test_name.into(),
            captured_at: Utc::now(),
            success,
            message,
        }
    }

    /// Adds a tag. Records without a tag map (availability, health) are returned unchanged.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(tags) = self.tags_mut() {
            tags.insert(key.into(), value.into());
        }
        self
    }

    /// Returns the tags of this record, if the variant carries any.
    #[must_use]
    pub fn tags(&self) -> Option<&Tags> {
        match self {
            Self::Trace { tags, .. } | Self::Metric { tags, .. } | Self::Exception { tags, .. } => {
                Some(tags)
            }
            Self::Availability { .. } | Self::Health { .. } => None,
        }
    }

    fn tags_mut(&mut self) -> Option<&mut Tags> {
        match self {
            Self::Trace { tags, .. } | Self::Metric { tags, .. } | Self::Exception { tags, .. } => {
                Some(tags)
            }
            Self::Availability { .. } | Self::Health { .. } => None,
        }
    }

    /// Short lowercase name of the record variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Trace { .. } => "trace",
            Self::Metric { .. } => "metric",
            Self::Exception { .. } => "exception",
            Self::Availability { .. } => "availability",
            Self::Health { .. } => "health",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner failure")]
    struct Inner;

    #[test]
    fn test_metric_with_tag() {
        let record = TelemetryRecord::metric("CPU", 12.5).with_tag("host", "node-1");

        match record {
            TelemetryRecord::Metric { name, value, tags } => {
                assert_eq!(name, "CPU");
                assert!((value - 12.5).abs() < f64::EPSILON);
                assert_eq!(tags.get("host"), Some(&"node-1".to_string()));
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn test_with_tag_ignored_for_availability() {
        let record = TelemetryRecord::availability("app", "watchdog", true, None).with_tag("k", "v");
        assert!(record.tags().is_none());
    }

    #[test]
    fn test_exception_captures_source_chain() {
        let error = Outer(Inner);
        let details = ExceptionDetails::from_error(&error);

        assert_eq!(details.message, "outer failure");
        assert_eq!(details.causes, vec!["inner failure".to_string()]);
        assert_eq!(details.to_string(), "outer failure: inner failure");
    }

    #[test]
    fn test_severity_from_health_state() {
        assert_eq!(TraceSeverity::from(HealthState::Error), TraceSeverity::Error);
        assert_eq!(TraceSeverity::from(HealthState::Warning), TraceSeverity::Warning);
        assert_eq!(TraceSeverity::from(HealthState::Ok), TraceSeverity::Information);
    }

    #[test]
    fn test_record_serialization_is_tagged() {
        let record = TelemetryRecord::trace("hello", TraceSeverity::Warning);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["kind"], "trace");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["message"], "hello");
    }
}
