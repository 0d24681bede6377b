//! journald export reader.
//!
//! Reads the JSON lines produced by `journalctl -o json -f` from any async
//! reader. The journal is a single stream, so every entry reaches every
//! subscription whatever log name it asked for, and a reload may rename the
//! log freely. Lines that cannot be decoded are published as unavailable
//! records.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;

use super::source::{
    ChannelEventSource, EventLevel, EventQuery, EventRecordUnavailableError, EventSource,
    EventSourceError, EventStream, RawEvent,
};

/// Event source fed by a journald JSON export stream.
#[derive(Debug, Clone)]
pub struct JournalEventSource {
    channel: Arc<ChannelEventSource>,
}

impl Default for JournalEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalEventSource {
    /// Creates a source with no input attached yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel: Arc::new(ChannelEventSource::any_log()),
        }
    }

    /// Starts reading `reader` line by line until it reaches end of input.
    pub fn spawn_reader<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let channel = Arc::clone(&self.channel);

        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match parse_entry(&line) {
                        Ok(event) => {
                            channel.broadcast(event);
                        }
                        Err(e) => {
                            channel.broadcast_unavailable(e.0);
                        }
                    },
                    Ok(None) => {
                        tracing::info!("Journal input ended");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read journal input");
                        break;
                    }
                }
            }
        })
    }
}

impl EventSource for JournalEventSource {
    fn subscribe(&self, query: &EventQuery) -> Result<EventStream, EventSourceError> {
        self.channel.subscribe(query)
    }
}

fn field<'a>(entry: &'a Value, name: &str) -> Option<&'a str> {
    entry.get(name).and_then(Value::as_str)
}

/// Decodes one journald JSON entry.
///
/// # Errors
///
/// Returns `EventRecordUnavailableError` if the line is not a JSON object or
/// has no textual `MESSAGE`.
pub fn parse_entry(line: &str) -> Result<RawEvent, EventRecordUnavailableError> {
    let entry: Value = serde_json::from_str(line)
        .map_err(|e| EventRecordUnavailableError(format!("invalid journal entry: {e}")))?;

    let description = field(&entry, "MESSAGE")
        .ok_or_else(|| EventRecordUnavailableError("journal entry has no MESSAGE".to_string()))?;

    let provider = field(&entry, "SYSLOG_IDENTIFIER")
        .or_else(|| field(&entry, "_COMM"))
        .unwrap_or("unknown");

    let level = field(&entry, "PRIORITY")
        .and_then(|p| p.parse::<u8>().ok())
        .map_or(EventLevel::Information, EventLevel::from_syslog_priority);

    let id = field(&entry, "SYSLOG_PID")
        .or_else(|| field(&entry, "_PID"))
        .and_then(|pid| pid.parse::<i32>().ok())
        .unwrap_or(0);

    let mut event = RawEvent::new(provider, id, level, description);
    if let Some(created) = field(&entry, "__REALTIME_TIMESTAMP")
        .and_then(|us| us.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_micros)
    {
        event = event.with_time_created(created);
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ERROR_LINE: &str = r#"{"__REALTIME_TIMESTAMP":"1700000000000000","PRIORITY":"3","SYSLOG_IDENTIFIER":"sshd","SYSLOG_PID":"812","MESSAGE":"fatal: connection reset"}"#;

    #[test]
    fn test_parse_entry() {
        let event = parse_entry(ERROR_LINE).unwrap();

        assert_eq!(event.provider_name, "sshd");
        assert_eq!(event.id, 812);
        assert_eq!(event.level, EventLevel::Error);
        assert_eq!(event.description, "fatal: connection reset");
        assert_eq!(event.time_created.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_entry_defaults() {
        let event = parse_entry(r#"{"MESSAGE":"hello","_COMM":"cron"}"#).unwrap();

        assert_eq!(event.provider_name, "cron");
        assert_eq!(event.id, 0);
        assert_eq!(event.level, EventLevel::Information);
        assert!(event.time_created.is_none());
    }

    #[test]
    fn test_parse_entry_rejects_unreadable_lines() {
        assert!(parse_entry("not json").is_err());
        assert!(parse_entry(r#"{"MESSAGE":[104,105]}"#).is_err());
    }

    #[tokio::test]
    async fn test_reader_publishes_to_subscribers() {
        let source = JournalEventSource::new();
        let mut stream = source
            .subscribe(&EventQuery::new("journal", EventLevel::Error))
            .unwrap();

        let input = format!("{ERROR_LINE}\n\nnot json\n");
        let reader = tokio::io::BufReader::new(std::io::Cursor::new(input.into_bytes()));
        source.spawn_reader(reader).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.unwrap().provider_name, "sshd");

        let second = stream.recv().await.unwrap();
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_entries_reach_any_log_name() {
        let source = JournalEventSource::new();
        let mut application = source.subscribe(&EventQuery::default()).unwrap();
        let mut system = source
            .subscribe(&EventQuery::new("System", EventLevel::Warning))
            .unwrap();

        let reader = tokio::io::BufReader::new(std::io::Cursor::new(ERROR_LINE.as_bytes().to_vec()));
        source.spawn_reader(reader).await.unwrap();

        assert_eq!(application.recv().await.unwrap().unwrap().provider_name, "sshd");
        assert_eq!(system.recv().await.unwrap().unwrap().provider_name, "sshd");
    }
}
