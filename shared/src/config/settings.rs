//! Settings document.
//!
//! A settings document is a JSON object of named sections, each mapping
//! parameter names to either a single text value or a list of text values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ConfigError;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parameter {
    /// A single text value.
    Text(String),
    /// An ordered list of text values.
    List(Vec<String>),
}

impl Parameter {
    /// Returns the value as text, if it is a single value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::List(_) => None,
        }
    }

    /// Returns the values in order. A single text value is a one-element list.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<String>> for Parameter {
    fn from(values: Vec<String>) -> Self {
        Self::List(values)
    }
}

/// Parameters of one section, by name.
pub type Section = BTreeMap<String, Parameter>;

/// An immutable snapshot of the settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationSettings {
    sections: BTreeMap<String, Section>,
}

impl ConfigurationSettings {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON settings document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the text is not a JSON object of
    /// sections holding text or list parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::ConfigurationSettings;
    ///
    /// let settings = ConfigurationSettings::from_json(r#"{"Telemetry":{"Credential":"key"}}"#).unwrap();
    /// assert_eq!(settings.text("Telemetry", "Credential"), Some("key"));
    /// ```
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Adds or replaces a parameter.
    #[must_use]
    pub fn with_parameter(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Parameter>,
    ) -> Self {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Returns a section by name.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Returns true if the section exists.
    #[must_use]
    pub fn contains_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Returns a parameter by section and key.
    #[must_use]
    pub fn parameter(&self, section: &str, key: &str) -> Option<&Parameter> {
        self.section(section).and_then(|s| s.get(key))
    }

    /// Returns a single text parameter by section and key.
    #[must_use]
    pub fn text(&self, section: &str, key: &str) -> Option<&str> {
        self.parameter(section, key).and_then(Parameter::as_text)
    }

    /// Returns a required parameter.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingSection` or `ConfigError::MissingKey`.
    pub fn require(&self, section: &str, key: &str) -> Result<&Parameter, ConfigError> {
        let params = self
            .section(section)
            .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;
        params.get(key).ok_or_else(|| ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_and_list_parameters() {
        let settings = ConfigurationSettings::from_json(
            r#"{
                "Telemetry": { "Credential": "key" },
                "Counters": { "Descriptors": ["a\\b|c", "d\\e"] }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.text("Telemetry", "Credential"), Some("key"));
        assert_eq!(
            settings.parameter("Counters", "Descriptors").unwrap().values(),
            vec!["a\\b|c", "d\\e"]
        );
        assert!(settings.text("Counters", "Descriptors").is_none());
    }

    #[test]
    fn test_parse_rejects_non_text_values() {
        let result = ConfigurationSettings::from_json(r#"{"Counters":{"CheckIntervalSecs":15}}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        tokio_test::assert_err!(ConfigurationSettings::from_json("[]"));
    }

    #[test]
    fn test_require_reports_what_is_missing() {
        let settings = ConfigurationSettings::new().with_parameter("Telemetry", "Other", "x");

        assert_eq!(
            settings.require("Counters", "Descriptors"),
            Err(ConfigError::MissingSection("Counters".to_string()))
        );
        assert_eq!(
            settings.require("Telemetry", "Credential"),
            Err(ConfigError::MissingKey {
                section: "Telemetry".to_string(),
                key: "Credential".to_string(),
            })
        );
    }

    #[test]
    fn test_with_parameter_replaces() {
        let settings = ConfigurationSettings::new()
            .with_parameter("Telemetry", "Credential", "a")
            .with_parameter("Telemetry", "Credential", "b");

        assert_eq!(settings.text("Telemetry", "Credential"), Some("b"));
        assert!(settings.contains_section("Telemetry"));
    }
}
