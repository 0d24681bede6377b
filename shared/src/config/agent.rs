//! Agent configuration derived from a settings document.

use std::time::Duration;
use validator::Validate;

use super::{ConfigError, ConfigurationSettings};
use crate::counters::CounterSpec;
use crate::events::{EventLevel, EventQuery};

/// Section holding the sink settings.
pub const TELEMETRY_SECTION: &str = "Telemetry";
/// Sink credential parameter.
pub const CREDENTIAL_KEY: &str = "Credential";
/// Section holding the counter settings.
pub const COUNTERS_SECTION: &str = "Counters";
/// Counter descriptor list parameter.
pub const DESCRIPTORS_KEY: &str = "Descriptors";
/// Sampling interval parameter, in whole seconds.
pub const CHECK_INTERVAL_KEY: &str = "CheckIntervalSecs";
/// Section holding the event-log settings.
pub const EVENT_LOG_SECTION: &str = "EventLog";
/// Watched log parameter.
pub const LOG_NAME_KEY: &str = "LogName";
/// Severity threshold parameter.
pub const MIN_SEVERITY_KEY: &str = "MinSeverity";

/// Sampling interval used when the document does not set one.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Everything the agent needs from one settings snapshot.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct AgentConfiguration {
    /// Credential the sink is created from.
    #[validate(length(min = 1, message = "Sink credential cannot be empty"))]
    pub sink_credential: String,
    /// Counters to sample, in declared order.
    pub counter_specs: Vec<CounterSpec>,
    /// Interval between sampling ticks.
    pub check_interval: Duration,
    /// Event log subscription.
    pub event_query: EventQuery,
}

impl AgentConfiguration {
    /// Creates a configuration that watches the default event query.
    #[must_use]
    pub fn new(
        sink_credential: impl Into<String>,
        counter_specs: Vec<CounterSpec>,
        check_interval: Duration,
    ) -> Self {
        Self {
            sink_credential: sink_credential.into(),
            counter_specs,
            check_interval,
            event_query: EventQuery::default(),
        }
    }

    /// Replaces the event query.
    #[must_use]
    pub fn with_event_query(mut self, event_query: EventQuery) -> Self {
        self.event_query = event_query;
        self
    }

    /// Builds a configuration from a settings snapshot.
    ///
    /// `Telemetry.Credential` is required. `Counters` and `EventLog` are
    /// optional and fall back to no counters sampled every 15 seconds and to
    /// error-level events of the `Application` log.
    ///
    /// # Errors
    ///
    /// Returns an error if a required section or key is missing, any counter
    /// descriptor is malformed, or a value is out of range. Nothing is
    /// partially applied.
    pub fn from_settings(settings: &ConfigurationSettings) -> Result<Self, ConfigError> {
        let sink_credential = settings
            .require(TELEMETRY_SECTION, CREDENTIAL_KEY)?
            .as_text()
            .ok_or_else(|| invalid(TELEMETRY_SECTION, CREDENTIAL_KEY, "expected a single value"))?
            .trim()
            .to_string();

        let counter_specs = match settings.parameter(COUNTERS_SECTION, DESCRIPTORS_KEY) {
            Some(descriptors) => descriptors
                .values()
                .into_iter()
                .enumerate()
                .map(|(index, descriptor)| {
                    CounterSpec::parse(descriptor)
                        .map_err(|source| ConfigError::MalformedCounter { index, source })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let check_interval = match optional_text(settings, COUNTERS_SECTION, CHECK_INTERVAL_KEY)? {
            Some(secs) => secs
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| invalid(COUNTERS_SECTION, CHECK_INTERVAL_KEY, &e.to_string()))?,
            None => DEFAULT_CHECK_INTERVAL,
        };

        let defaults = EventQuery::default();
        let log_name = match optional_text(settings, EVENT_LOG_SECTION, LOG_NAME_KEY)? {
            Some(name) if name.trim().is_empty() => {
                return Err(invalid(EVENT_LOG_SECTION, LOG_NAME_KEY, "must not be blank"));
            }
            Some(name) => name.to_string(),
            None => defaults.log_name,
        };
        let min_level = match optional_text(settings, EVENT_LOG_SECTION, MIN_SEVERITY_KEY)? {
            Some(level) => level
                .trim()
                .parse::<EventLevel>()
                .map_err(|e| invalid(EVENT_LOG_SECTION, MIN_SEVERITY_KEY, &e))?,
            None => defaults.min_level,
        };

        let config = Self {
            sink_credential,
            counter_specs,
            check_interval,
            event_query: EventQuery::new(log_name, min_level),
        };
        config.validate_config()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The sink credential is empty
    /// - The check interval is zero
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(invalid(
                COUNTERS_SECTION,
                CHECK_INTERVAL_KEY,
                "must be greater than zero",
            ));
        }
        self.validate()?;
        Ok(())
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn optional_text<'a>(
    settings: &'a ConfigurationSettings,
    section: &str,
    key: &str,
) -> Result<Option<&'a str>, ConfigError> {
    settings
        .parameter(section, key)
        .map(|p| {
            p.as_text()
                .ok_or_else(|| invalid(section, key, "expected a single value"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::MalformedSpecError;

    fn base() -> ConfigurationSettings {
        ConfigurationSettings::new().with_parameter(TELEMETRY_SECTION, CREDENTIAL_KEY, "key")
    }

    #[test]
    fn test_minimal_document_uses_defaults() {
        let config = AgentConfiguration::from_settings(&base()).unwrap();

        assert_eq!(config.sink_credential, "key");
        assert!(config.counter_specs.is_empty());
        assert_eq!(config.check_interval, DEFAULT_CHECK_INTERVAL);
        assert_eq!(config.event_query, EventQuery::default());
    }

    #[test]
    fn test_full_document() {
        let settings = ConfigurationSettings::from_json(
            r#"{
                "Telemetry": { "Credential": " key " },
                "Counters": {
                    "Descriptors": ["Processor(_Total)\\% Processor Time|CPU", "Memory\\Available MBytes"],
                    "CheckIntervalSecs": "5"
                },
                "EventLog": { "LogName": "System", "MinSeverity": "warning" }
            }"#,
        )
        .unwrap();

        let config = AgentConfiguration::from_settings(&settings).unwrap();

        assert_eq!(config.sink_credential, "key");
        assert_eq!(config.counter_specs.len(), 2);
        assert_eq!(config.counter_specs[0].friendly_name(), "CPU");
        assert_eq!(config.counter_specs[1].friendly_name(), "Available MBytes");
        assert_eq!(config.check_interval, Duration::from_secs(5));
        assert_eq!(config.event_query, EventQuery::new("System", EventLevel::Warning));
    }

    #[test]
    fn test_missing_telemetry_section() {
        let settings = ConfigurationSettings::new().with_parameter(COUNTERS_SECTION, "x", "y");

        assert_eq!(
            AgentConfiguration::from_settings(&settings),
            Err(ConfigError::MissingSection(TELEMETRY_SECTION.to_string()))
        );
    }

    #[test]
    fn test_blank_credential_rejected() {
        let settings = ConfigurationSettings::new().with_parameter(TELEMETRY_SECTION, CREDENTIAL_KEY, "  ");

        let err = AgentConfiguration::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_one_malformed_descriptor_rejects_all() {
        let settings = base().with_parameter(
            COUNTERS_SECTION,
            DESCRIPTORS_KEY,
            vec!["Memory\\Available MBytes".to_string(), "NoSeparator|X".to_string()],
        );

        let err = AgentConfiguration::from_settings(&settings).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MalformedCounter {
                index: 1,
                source: MalformedSpecError::MissingMetricSeparator("NoSeparator|X".to_string()),
            }
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let settings = base().with_parameter(COUNTERS_SECTION, CHECK_INTERVAL_KEY, "0");

        assert!(matches!(
            AgentConfiguration::from_settings(&settings),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_unknown_severity_rejected() {
        let settings = base().with_parameter(EVENT_LOG_SECTION, MIN_SEVERITY_KEY, "loud");

        assert!(matches!(
            AgentConfiguration::from_settings(&settings),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
