//! Event source abstraction.
//!
//! An `EventSource` turns a log-name/severity query into a stream of raw
//! event deliveries. A delivery is either a readable event or an
//! `EventRecordUnavailableError` when the record itself could not be read.
//!
//! Sources number the events they publish. A stream records the first
//! number it can receive, which lets a new subscription take over from an
//! older one without either losing or repeating an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::RetrievedLogRecord;

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Verbose diagnostics.
    Verbose,
    /// Informational events.
    Information,
    /// Warnings.
    Warning,
    /// Errors.
    Error,
    /// Critical failures.
    Critical,
}

impl EventLevel {
    /// Maps a syslog priority (0 = emergency .. 7 = debug) to a level.
    #[must_use]
    pub fn from_syslog_priority(priority: u8) -> Self {
        match priority {
            0..=2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 | 6 => Self::Information,
            _ => Self::Verbose,
        }
    }

    /// Returns true if this level is `threshold` or more severe.
    #[must_use]
    pub fn is_at_least(self, threshold: Self) -> bool {
        self >= threshold
    }
}

impl std::fmt::Display for EventLevel {
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

impl FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verbose" | "debug" => Ok(Self::Verbose),
            "information" | "info" => Ok(Self::Information),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" | "fatal" => Ok(Self::Critical),
            other => Err(format!("unknown event level '{other}'")),
        }
    }
}

/// Which events a subscription is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Log to subscribe to (for example `Application`).
    pub log_name: String,
    /// Least severe level that qualifies.
    pub min_level: EventLevel,
}

impl EventQuery {
    /// Creates a query.
    #[must_use]
    pub fn new(log_name: impl Into<String>, min_level: EventLevel) -> Self {
        Self {
            log_name: log_name.into(),
            min_level,
        }
    }

    /// Returns true if an event of `level` in `log_name` matches this query.
    #[must_use]
    pub fn matches(&self, log_name: &str, level: EventLevel) -> bool {
        self.log_name == log_name && level.is_at_least(self.min_level)
    }
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::new("Application", EventLevel::Error)
    }
}

/// An event as read from the log, before it is turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Provider that wrote the event.
    pub provider_name: String,
    /// Creation time, if recorded.
    pub time_created: Option<DateTime<Utc>>,
    /// Numeric event identifier.
    pub id: i32,
    /// Severity.
    pub level: EventLevel,
    /// Rendered description.
    pub description: String,
    /// Position assigned by the source on publish.
    pub sequence: u64,
}

impl RawEvent {
    /// Creates an event with no timestamp.
    #[must_use]
    pub fn new(
        provider_name: impl Into<String>,
        id: i32,
        level: EventLevel,
        description: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            time_created: None,
            id,
            level,
            description: description.into(),
            sequence: 0,
        }
    }

    /// Sets the creation time.
    #[must_use]
    pub fn with_time_created(mut self, time_created: DateTime<Utc>) -> Self {
        self.time_created = Some(time_created);
        self
    }

    /// Builds the retrieved record delivered to watchers.
    #[must_use]
    pub fn into_record(self) -> RetrievedLogRecord {
        RetrievedLogRecord {
            source: self.provider_name,
            timestamp: self.time_created,
            event_id: self.id,
            description: self.description,
        }
    }
}

/// A delivered event could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Event record unavailable: {0}")]
pub struct EventRecordUnavailableError(pub String);

/// Errors raised when subscribing to an event source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventSourceError {
    /// The requested log does not exist.
    #[error("Unknown event log: '{0}'")]
    UnknownLog(String),

    /// Subscribing failed for another reason.
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
}

/// One item of an event stream.
pub type EventDelivery = Result<RawEvent, EventRecordUnavailableError>;

/// Stream of deliveries for one subscription. Dropping it ends the subscription.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<EventDelivery>,
    start: u64,
}

impl EventStream {
    /// Wraps a receiver that only sees events numbered `start` or later.
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<EventDelivery>, start: u64) -> Self {
        Self { receiver, start }
    }

    /// Sequence number of the first event this subscription can receive.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Waits for the next delivery. Returns `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<EventDelivery> {
        self.receiver.recv().await
    }

    /// Takes a delivery that is already queued.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is queued or the source is gone.
    pub fn try_recv(&mut self) -> Result<EventDelivery, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Produces event streams for queries.
pub trait EventSource: Send + Sync {
    /// Subscribes to events matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log does not exist or the subscription fails.
    fn subscribe(&self, query: &EventQuery) -> Result<EventStream, EventSourceError>;
}

/// In-process event source.
///
/// Events published here are fanned out to every live subscription whose
/// query matches. Subscriptions whose stream was dropped are pruned on the
/// next publish. A source built with [`ChannelEventSource::any_log`] accepts
/// subscriptions for any log name.
///
/// # Example
///
/// ```
/// use shared::events::{ChannelEventSource, EventLevel, EventQuery, EventSource, RawEvent};
///
/// let source = ChannelEventSource::new(["Application"]);
/// let mut stream = source.subscribe(&EventQuery::new("Application", EventLevel::Error)).unwrap();
///
/// source.publish("Application", RawEvent::new("disk", 7, EventLevel::Error, "bad block"));
///
/// let delivered = stream.try_recv().unwrap().unwrap();
/// assert_eq!(delivered.provider_name, "disk");
/// ```
#[derive(Debug)]
pub struct ChannelEventSource {
    logs: Option<Vec<String>>,
    subscribers: Mutex<Subscribers>,
}

#[derive(Debug, Default)]
struct Subscribers {
    next_sequence: u64,
    streams: Vec<(EventQuery, mpsc::UnboundedSender<EventDelivery>)>,
}

impl Subscribers {
    fn deliver(&mut self, wants: impl Fn(&EventQuery) -> bool, delivery: &EventDelivery) -> usize {
        self.streams.retain(|(_, tx)| !tx.is_closed());
        self.streams
            .iter()
            .filter(|(query, _)| wants(query))
            .filter(|(_, tx)| tx.send(delivery.clone()).is_ok())
            .count()
    }

    fn number(&mut self, mut event: RawEvent) -> RawEvent {
        event.sequence = self.next_sequence;
        self.next_sequence += 1;
        event
    }
}

impl ChannelEventSource {
    /// Creates a source serving the given log names.
    pub fn new<I, S>(logs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            logs: Some(logs.into_iter().map(Into::into).collect()),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Creates a source that accepts subscriptions for any log name.
    #[must_use]
    pub fn any_log() -> Self {
        Self {
            logs: None,
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Publishes an event to `log_name`. Returns the number of subscriptions it reached.
    pub fn publish(&self, log_name: &str, event: RawEvent) -> usize {
        let mut subscribers = self.lock();
        let event = subscribers.number(event);
        let level = event.level;
        subscribers.deliver(|query| query.matches(log_name, level), &Ok(event))
    }

    /// Publishes an event to every subscription whose severity threshold it
    /// meets, whatever log the subscription names.
    pub fn broadcast(&self, event: RawEvent) -> usize {
        let mut subscribers = self.lock();
        let event = subscribers.number(event);
        let level = event.level;
        subscribers.deliver(|query| level.is_at_least(query.min_level), &Ok(event))
    }

    /// Publishes an unreadable record to every subscription of `log_name`.
    pub fn publish_unavailable(&self, log_name: &str, reason: impl Into<String>) -> usize {
        let delivery = Err(EventRecordUnavailableError(reason.into()));
        self.lock().deliver(|query| query.log_name == log_name, &delivery)
    }

    /// Publishes an unreadable record to every subscription.
    pub fn broadcast_unavailable(&self, reason: impl Into<String>) -> usize {
        let delivery = Err(EventRecordUnavailableError(reason.into()));
        self.lock().deliver(|_| true, &delivery)
    }

    /// Number of subscriptions whose stream is still alive.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.streams.retain(|(_, tx)| !tx.is_closed());
        subscribers.streams.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EventSource for ChannelEventSource {
    fn subscribe(&self, query: &EventQuery) -> Result<EventStream, EventSourceError> {
        if let Some(logs) = &self.logs {
            if !logs.iter().any(|log| log == &query.log_name) {
                return Err(EventSourceError::UnknownLog(query.log_name.clone()));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| EventSourceError::SubscriptionFailed("lock poisoned".to_string()))?;
        subscribers.streams.push((query.clone(), tx));
        Ok(EventStream::new(rx, subscribers.next_sequence))
    }
}
