//! Data models for the Vaktr telemetry relay.
//!
//! This module contains the telemetry record union, the retrieved event-log
//! record, and the cluster health shapes.

pub mod event;
pub mod health;
pub mod telemetry;

pub use event::RetrievedLogRecord;
pub use health::{ApplicationHealthState, ClusterHealth, HealthState, ServiceHealthState};
pub use telemetry::{ExceptionDetails, Tags, TelemetryRecord, TraceSeverity};
