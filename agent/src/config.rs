//! Process configuration module.
//!
//! Handles loading process settings from environment variables with sensible
//! defaults. The reloadable agent settings live in the settings document that
//! `config_path` points to.

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which loop shape the agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Sample the configured counters on a fixed interval.
    Polling,
    /// Forward qualifying event-log records as they arrive.
    EventDriven,
}

impl FromStr for AgentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "polling" | "counters" => Ok(Self::Polling),
            "events" | "event-driven" | "event_driven" => Ok(Self::EventDriven),
            other => bail!("unknown agent mode '{other}' (expected 'polling' or 'events')"),
        }
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Polling => write!(f, "polling"),
            Self::EventDriven => write!(f, "events"),
        }
    }
}

/// Agent process configuration.
///
/// Configuration values can be set via environment variables:
/// - `VAKTR_CONFIG_PATH`: Settings document to load and watch (default: "config/vaktr.json")
/// - `VAKTR_MODE`: `polling` or `events` (default: "polling")
/// - `VAKTR_HEALTH_SNAPSHOT_PATH`: Cluster health snapshot; enables the health poll loop
/// - `VAKTR_HEALTH_INTERVAL_SECS`: Health poll cadence (default: 30)
/// - `VAKTR_CONFIG_POLL_SECS`: Settings change-detection cadence (default: 5)
/// - `VAKTR_EVENT_STDIN`: Read journald JSON entries from stdin (default: false)
/// - `VAKTR_HOST`: The host address for the status endpoint (default: "0.0.0.0")
/// - `VAKTR_PORT`: The port for the status endpoint (default: 9464)
#[derive(Debug, Clone)]
pub struct Config {
    /// Settings document path.
    pub config_path: PathBuf,
    /// Loop shape.
    pub mode: AgentMode,
    /// Cluster health snapshot path, if health polling is enabled.
    pub health_snapshot_path: Option<PathBuf>,
    /// Interval between health poll ticks.
    pub health_interval: Duration,
    /// Interval between settings change checks.
    pub config_poll_interval: Duration,
    /// Whether stdin feeds the event watcher.
    pub event_stdin: bool,
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
}

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `VAKTR_MODE` names an unknown mode
    /// - `VAKTR_PORT` is set but cannot be parsed as a valid port number
    /// - An interval is not a positive whole number of seconds
    /// - `VAKTR_EVENT_STDIN` is not `true` or `false`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config_path = std::env::var("VAKTR_CONFIG_PATH")
            .map_or(defaults.config_path, PathBuf::from);

        let mode = std::env::var("VAKTR_MODE")
            .ok()
            .map(|m| m.parse::<AgentMode>())
            .transpose()?
            .unwrap_or(defaults.mode);

        let health_snapshot_path = std::env::var("VAKTR_HEALTH_SNAPSHOT_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let health_interval = secs_var("VAKTR_HEALTH_INTERVAL_SECS")?
            .unwrap_or(defaults.health_interval);
        let config_poll_interval =
            secs_var("VAKTR_CONFIG_POLL_SECS")?.unwrap_or(defaults.config_poll_interval);

        let event_stdin = std::env::var("VAKTR_EVENT_STDIN")
            .ok()
            .map(|v| v.parse::<bool>())
            .transpose()
            .context("VAKTR_EVENT_STDIN must be 'true' or 'false'")?
            .unwrap_or(defaults.event_stdin);

        let host = std::env::var("VAKTR_HOST").unwrap_or(defaults.host);

        let port = std::env::var("VAKTR_PORT")
            .ok()
            .map(|p| p.parse::<u16>())
            .transpose()?
            .unwrap_or(defaults.port);

        Ok(Self {
            config_path,
            mode,
            health_snapshot_path,
            health_interval,
            config_poll_interval,
            event_stdin,
            host,
            port,
        })
    }

    /// Returns the socket address for binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the host and port do not form a valid socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid status address {}:{}", self.host, self.port))
    }
}

fn secs_var(name: &str) -> Result<Option<Duration>> {
    let Ok(value) = std::env::var(name) else {
        return Ok(None);
    };
    let secs = value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{name} must be a whole number of seconds"))?;
    if secs == 0 {
        bail!("{name} must be greater than zero");
    }
    Ok(Some(Duration::from_secs(secs)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/vaktr.json"),
            mode: AgentMode::Polling,
            health_snapshot_path: None,
            health_interval: Duration::from_secs(30),
            config_poll_interval: Duration::from_secs(5),
            event_stdin: false,
            host: "0.0.0.0".to_string(),
            port: 9464,
        }
    }
}
