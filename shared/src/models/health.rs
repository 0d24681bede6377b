//! Cluster health model.
//!
//! The shapes returned by an aggregate health query: one entry per
//! application, optionally with the per-service detail that explains an
//! unhealthy aggregate.

use serde::{Deserialize, Serialize};

/// Aggregated health state of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthState {
    /// Healthy.
    Ok,
    /// Degraded but serving.
    Warning,
    /// Unhealthy.
    Error,
    /// No health information available.
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "Ok"),
            Self::Warning => write!(f, "Warning"),
            Self::Error => write!(f, "Error"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Health of a single service instance inside an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthState {
    /// Service name.
    pub service_name: String,
    /// Instance (or replica) identifier.
    #[serde(default)]
    pub instance: String,
    /// Source of the health report.
    #[serde(default)]
    pub source: String,
    /// Property the health report is about.
    #[serde(default)]
    pub property: String,
    /// Reported state.
    pub state: HealthState,
}

/// Aggregated health of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationHealthState {
    /// Application name as reported by the cluster (for example `fabric:/Orders`).
    pub name: String,
    /// Aggregated state across the application's services.
    pub aggregated_state: HealthState,
    /// Per-service detail, when the query returned any.
    #[serde(default)]
    pub services: Vec<ServiceHealthState>,
}

impl ApplicationHealthState {
    /// Creates an application health entry without service detail.
    #[must_use]
    pub fn new(name: impl Into<String>, aggregated_state: HealthState) -> Self {
        Self {
            name: name.into(),
            aggregated_state,
            services: Vec::new(),
        }
    }

    /// Adds service detail.
    #[must_use]
    pub fn with_service(mut self, service: ServiceHealthState) -> Self {
        self.services.push(service);
        self
    }

    /// Name used when reporting: the path of the application URI, so
    /// `fabric:/Orders` reports as `/Orders`. Leading backslashes are removed.
    #[must_use]
    pub fn display_name(&self) -> &str {
        let path = match self.name.split_once(':') {
            Some((scheme, path)) if !scheme.is_empty() && !scheme.contains(['/', '\\']) => path,
            _ => self.name.as_str(),
        };
        path.trim_start_matches('\\')
    }

    /// An application counts as available unless its aggregate is `Error`.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.aggregated_state != HealthState::Error
    }
}

/// Result of an aggregate cluster health query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterHealth {
    /// Aggregated state of the whole cluster.
    #[serde(default)]
    pub aggregated_state: HealthState,
    /// Application states, in the order the query returned them.
    #[serde(default)]
    pub applications: Vec<ApplicationHealthState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_only_fails_on_error() {
        assert!(ApplicationHealthState::new("a", HealthState::Ok).is_available());
        assert!(ApplicationHealthState::new("a", HealthState::Warning).is_available());
        assert!(ApplicationHealthState::new("a", HealthState::Unknown).is_available());
        assert!(!ApplicationHealthState::new("a", HealthState::Error).is_available());
    }

    #[test]
    fn test_display_name_trims_leading_backslashes() {
        let app = ApplicationHealthState::new("\\\\Orders", HealthState::Ok);
        assert_eq!(app.display_name(), "Orders");
    }

    #[test]
    fn test_display_name_drops_uri_scheme() {
        let app = ApplicationHealthState::new("fabric:/Orders", HealthState::Ok);
        assert_eq!(app.display_name(), "/Orders");

        let nested = ApplicationHealthState::new("fabric:/Shop/Orders", HealthState::Ok);
        assert_eq!(nested.display_name(), "/Shop/Orders");
    }

    #[test]
    fn test_cluster_health_deserialization_keeps_order() {
        let json = r#"{
            "aggregated_state": "Error",
            "applications": [
                {"name": "fabric:/B", "aggregated_state": "Ok"},
                {"name": "fabric:/A", "aggregated_state": "Error",
                 "services": [{"service_name": "fabric:/A/Web", "state": "Error"}]}
            ]
        }"#;

        let health: ClusterHealth = serde_json::from_str(json).unwrap();

        assert_eq!(health.aggregated_state, HealthState::Error);
        assert_eq!(health.applications[0].name, "fabric:/B");
        assert_eq!(health.applications[1].name, "fabric:/A");
        assert_eq!(health.applications[1].services.len(), 1);
        assert_eq!(health.applications[1].services[0].instance, "");
    }
}
