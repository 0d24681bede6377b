//! Retrieved event-log record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::telemetry::{TelemetryRecord, TraceSeverity};

/// A qualifying OS log event, captured once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedLogRecord {
    /// Name of the provider that wrote the event.
    pub source: String,
    /// When the event was created, if the log recorded it.
    pub timestamp: Option<DateTime<Utc>>,
    /// Numeric event identifier.
    pub event_id: i32,
    /// Rendered event description.
    pub description: String,
}

impl RetrievedLogRecord {
    /// Converts the record into an error-severity trace tagged with its source and id.
    #[must_use]
    pub fn into_trace(self) -> TelemetryRecord {
        let event_id = self.event_id.to_string();
        TelemetryRecord::trace(self.description, TraceSeverity::Error)
            .with_tag("Source", self.source)
            .with_tag("EventId", event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_trace() {
        let record = RetrievedLogRecord {
            source: "disk".to_string(),
            timestamp: None,
            event_id: 7,
            description: "bad block".to_string(),
        };

        match record.into_trace() {
            TelemetryRecord::Trace {
                message,
                severity,
                tags,
            } => {
                assert_eq!(message, "bad block");
                assert_eq!(severity, TraceSeverity::Error);
                assert_eq!(tags.get("Source"), Some(&"disk".to_string()));
                assert_eq!(tags.get("EventId"), Some(&"7".to_string()));
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }
}
