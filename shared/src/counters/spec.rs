//! Counter descriptor parsing.
//!
//! A descriptor names one performance counter and the name it is reported
//! under:
//!
//! - `Processor(_Total)\% Processor Time|CPU`
//! - `Memory\% Committed Bytes In Use|Committed`
//! - `Memory\Available MBytes` (reported as `Available MBytes`)
//!
//! The friendly name is the segment after the last `|`; the counter path is
//! the segment before the first `|`. Within the path the metric follows the
//! last `\`. When the text before it has the shape `category(instance)` it is
//! split accordingly; anything else is taken whole as the category.

use nom::{
    bytes::complete::take_till1,
    character::complete::char,
    combinator::{map_opt, rest},
    sequence::preceded,
    IResult, Parser,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when a counter descriptor does not match the accepted grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedSpecError {
    /// The descriptor is empty or whitespace.
    #[error("Counter descriptor is empty")]
    Empty,

    /// The counter path has no `\` separating category and metric.
    #[error("Counter descriptor '{0}' has no '\\' between category and metric")]
    MissingMetricSeparator(String),

    /// Nothing follows the last `\`.
    #[error("Counter descriptor '{0}' has an empty metric")]
    EmptyMetric(String),
}

/// Structured form of a counter descriptor.
///
/// Immutable once built; the friendly name falls back to the metric when no
/// (or a blank) name was supplied.
///
/// # Example
///
/// ```
/// use shared::counters::CounterSpec;
///
/// let spec = CounterSpec::parse(r"Processor(_Total)\% Processor Time|CPU").unwrap();
///
/// assert_eq!(spec.category(), "Processor");
/// assert_eq!(spec.instance(), "_Total");
/// assert_eq!(spec.metric(), "% Processor Time");
/// assert_eq!(spec.friendly_name(), "CPU");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawCounterSpec")]
pub struct CounterSpec {
    category: String,
    instance: String,
    metric: String,
    friendly_name: String,
}

#[derive(Deserialize)]
struct RawCounterSpec {
    category: String,
    #[serde(default)]
    instance: String,
    metric: String,
    #[serde(default)]
    friendly_name: Option<String>,
}

impl From<RawCounterSpec> for CounterSpec {
    fn from(raw: RawCounterSpec) -> Self {
        Self::new(raw.category, raw.instance, raw.metric, raw.friendly_name)
    }
}

impl CounterSpec {
    /// Creates a spec from its parts.
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        instance: impl Into<String>,
        metric: impl Into<String>,
        friendly_name: Option<String>,
    ) -> Self {
        let metric = metric.into();
        let friendly_name = friendly_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| metric.clone());

        Self {
            category: category.into(),
            instance: instance.into(),
            metric,
            friendly_name,
        }
    }

    /// Parses a textual descriptor.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedSpecError` if:
    /// - The descriptor is empty
    /// - The counter path contains no `\`
    /// - The metric after the last `\` is empty
    pub fn parse(text: &str) -> Result<Self, MalformedSpecError> {
        if text.trim().is_empty() {
            return Err(MalformedSpecError::Empty);
        }

        let (path, friendly_name) = match text.split_once('|') {
            Some((path, _)) => (path, text.rsplit('|').next()),
            None => (text, None),
        };

        let Some((segment, metric)) = path.rsplit_once('\\') else {
            return Err(MalformedSpecError::MissingMetricSeparator(text.to_string()));
        };
        if metric.is_empty() {
            return Err(MalformedSpecError::EmptyMetric(text.to_string()));
        }

        let (category, instance) = match category_with_instance(segment) {
            Ok((_, parts)) => parts,
            Err(_) => (segment, ""),
        };

        Ok(Self::new(
            category,
            instance,
            metric,
            friendly_name.map(str::to_string),
        ))
    }

    /// Counter category (for example `Processor`).
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Counter instance; empty for single-instance categories.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Metric within the category.
    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Name the counter's samples are reported under.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }
}

impl fmt::Display for CounterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}\\{}|{}", self.category, self.metric, self.friendly_name)
        } else {
            write!(
                f,
                "{}({})\\{}|{}",
                self.category, self.instance, self.metric, self.friendly_name
            )
        }
    }
}

impl FromStr for CounterSpec {
    type Err = MalformedSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// `<category>(<instance>)`: the category runs to the first `(` and the
// instance to the `)` that ends the segment, so instances may nest parentheses.
fn category_with_instance(input: &str) -> IResult<&str, (&str, &str)> {
    (
        take_till1(|c: char| c == '(' || c == ')'),
        preceded(char('('), map_opt(rest, |inner: &str| inner.strip_suffix(')'))),
    )
        .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_instance() {
        let spec = CounterSpec::parse(r"Processor(_Total)\% Processor Time|CPU").unwrap();

        assert_eq!(spec.category(), "Processor");
        assert_eq!(spec.instance(), "_Total");
        assert_eq!(spec.metric(), "% Processor Time");
        assert_eq!(spec.friendly_name(), "CPU");
    }

    #[test]
    fn test_parse_without_instance() {
        let spec = CounterSpec::parse(r"Memory\% Committed Bytes In Use|Committed").unwrap();

        assert_eq!(spec.category(), "Memory");
        assert_eq!(spec.instance(), "");
        assert_eq!(spec.metric(), "% Committed Bytes In Use");
        assert_eq!(spec.friendly_name(), "Committed");
    }

    #[test]
    fn test_parse_category_with_spaces_and_instance() {
        let spec = CounterSpec::parse(
            r".NET CLR Exceptions(_Global_)\# of Exceps Thrown / Sec|# of Exceps Thrown / Sec",
        )
        .unwrap();

        assert_eq!(spec.category(), ".NET CLR Exceptions");
        assert_eq!(spec.instance(), "_Global_");
        assert_eq!(spec.metric(), "# of Exceps Thrown / Sec");
    }

    #[test]
    fn test_parse_without_friendly_name_uses_metric() {
        let spec = CounterSpec::parse(r"Memory\Available MBytes").unwrap();
        assert_eq!(spec.friendly_name(), "Available MBytes");
    }

    #[test]
    fn test_parse_blank_friendly_name_uses_metric() {
        let spec = CounterSpec::parse(r"Memory\Available MBytes|  ").unwrap();
        assert_eq!(spec.friendly_name(), "Available MBytes");
    }

    #[test]
    fn test_parse_multiple_pipes_uses_first_and_last() {
        let spec = CounterSpec::parse(r"Memory\Available Bytes|ignored|Free").unwrap();

        assert_eq!(spec.metric(), "Available Bytes");
        assert_eq!(spec.friendly_name(), "Free");
    }

    #[test]
    fn test_parse_metric_follows_last_backslash() {
        let spec = CounterSpec::parse(r"Paging File\Usage\% Usage|Paging").unwrap();

        assert_eq!(spec.category(), r"Paging File\Usage");
        assert_eq!(spec.metric(), "% Usage");
    }

    #[test]
    fn test_parse_is_case_sensitive_and_untrimmed() {
        let spec = CounterSpec::parse(r" memory (x)\ avail |n").unwrap();

        assert_eq!(spec.category(), " memory ");
        assert_eq!(spec.instance(), "x");
        assert_eq!(spec.metric(), " avail ");
    }

    #[test]
    fn test_parse_empty_instance_parentheses() {
        let spec = CounterSpec::parse(r"Processor()\% Idle Time|Idle").unwrap();
        assert_eq!(spec.instance(), "");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(CounterSpec::parse("   "), Err(MalformedSpecError::Empty));
        assert!(matches!(
            CounterSpec::parse("Memory|Name"),
            Err(MalformedSpecError::MissingMetricSeparator(_))
        ));
        assert!(matches!(
            CounterSpec::parse(r"Memory\|Name"),
            Err(MalformedSpecError::EmptyMetric(_))
        ));
    }

    #[test]
    fn test_parse_irregular_segment_is_whole_category() {
        for segment in ["Processor(_Total)x", "Processor(_Total", "(_Total)", "Proc)x(y)", ""] {
            let spec = CounterSpec::parse(&format!("{segment}\\Metric|Name")).unwrap();

            assert_eq!(spec.category(), segment);
            assert_eq!(spec.instance(), "");
            assert_eq!(spec.metric(), "Metric");
            assert_eq!(spec.friendly_name(), "Name");
        }
    }

    #[test]
    fn test_parse_instance_with_nested_parentheses() {
        let spec = CounterSpec::parse(r"Network Adapter(Intel(R) Ethernet)\Bytes Total/sec").unwrap();

        assert_eq!(spec.category(), "Network Adapter");
        assert_eq!(spec.instance(), "Intel(R) Ethernet");
        assert_eq!(spec.metric(), "Bytes Total/sec");
        assert_eq!(spec.to_string().parse::<CounterSpec>().unwrap(), spec);
    }

    #[test]
    fn test_display_reparses_to_same_spec() {
        let specs = [
            CounterSpec::new("Processor", "_Total", "% Processor Time", Some("CPU".into())),
            CounterSpec::new("Memory", "", "Available MBytes", None),
            CounterSpec::new("LogicalDisk", "C:", "% Free Space", Some("Disk C".into())),
        ];

        for spec in specs {
            let reparsed: CounterSpec = spec.to_string().parse().unwrap();
            assert_eq!(reparsed, spec);
        }
    }

    #[test]
    fn test_deserialize_applies_friendly_name_default() {
        let spec: CounterSpec =
            serde_json::from_str(r#"{"category": "Memory", "metric": "Available MBytes"}"#)
                .unwrap();

        assert_eq!(spec.instance(), "");
        assert_eq!(spec.friendly_name(), "Available MBytes");
    }
}
