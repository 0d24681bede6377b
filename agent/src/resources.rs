//! Live resource sets.
//!
//! A [`LiveResourceSet`] bundles everything derived from one configuration
//! snapshot: the sink handle, the opened counters, and the event watcher.
//! Sets are immutable once built and are replaced as a whole, so a reader
//! never sees counters from one snapshot next to the sink of another.

use async_trait::async_trait;
use shared::config::AgentConfiguration;
use shared::counters::{CounterSet, CounterSource};
use shared::events::{EventSource, EventWatcher, LogHandler};
use shared::models::TelemetryRecord;
use shared::sink::{SinkError, SinkFactory, SinkHandle};
use shared::swap::Dispose;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::agent_loop::AgentError;
use crate::config::AgentMode;

/// Anything telemetry can be reported through.
#[async_trait]
pub trait TelemetryReporter: Send + Sync {
    /// Reports one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record was abandoned or rejected.
    async fn report(&self, record: TelemetryRecord) -> Result<(), SinkError>;
}

#[async_trait]
impl TelemetryReporter for SinkHandle {
    async fn report(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        SinkHandle::report(self, record).await
    }
}

/// The external collaborators resource sets are built from.
#[derive(Clone)]
pub struct Collaborators {
    /// Builds sinks from the configured credential.
    pub sink_factory: Arc<dyn SinkFactory>,
    /// Opens counters for the polling path.
    pub counter_source: Arc<dyn CounterSource>,
    /// Provides event subscriptions for the event-driven path.
    pub event_source: Arc<dyn EventSource>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Resources derived from one configuration snapshot.
#[derive(Debug)]
pub struct LiveResourceSet {
    generation: u64,
    check_interval: Duration,
    sink: SinkHandle,
    counters: CounterSet,
    watcher: Option<EventWatcher>,
    disposed: AtomicBool,
}

impl LiveResourceSet {
    /// Builds a set for `mode` from `config`.
    ///
    /// The polling path opens every configured counter; the event-driven path
    /// subscribes `handler` to the configured event log. When `previous` has a
    /// watcher, the new subscription takes over from it, so each event is
    /// delivered by only one of the two sets. Nothing is kept if any step fails.
    pub(crate) fn build(
        generation: u64,
        mode: AgentMode,
        config: &AgentConfiguration,
        collaborators: &Collaborators,
        handler: &LogHandler,
        previous: Option<&LiveResourceSet>,
    ) -> Result<Self, AgentError> {
        let sink = SinkHandle::new(collaborators.sink_factory.create(&config.sink_credential)?);

        let (counters, watcher) = match mode {
            AgentMode::Polling => (
                CounterSet::open_all(&config.counter_specs, collaborators.counter_source.as_ref())?,
                None,
            ),
            AgentMode::EventDriven => {
                let source = collaborators.event_source.as_ref();
                let query = config.event_query.clone();
                let handler = Arc::clone(handler);
                let watcher = match previous.and_then(LiveResourceSet::watcher) {
                    Some(current) => current.hand_over(source, query, handler)?,
                    None => EventWatcher::subscribe(source, query, handler)?,
                };
                (CounterSet::default(), Some(watcher))
            }
        };

        Ok(Self {
            generation,
            check_interval: config.check_interval,
            sink,
            counters,
            watcher,
            disposed: AtomicBool::new(false),
        })
    }

    /// Position of this set in the sequence of installed sets, starting at 1.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Interval between sampling ticks.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// The sink handle.
    #[must_use]
    pub fn sink(&self) -> &SinkHandle {
        &self.sink
    }

    /// The opened counters, in configuration order.
    #[must_use]
    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// The event watcher, on the event-driven path.
    #[must_use]
    pub fn watcher(&self) -> Option<&EventWatcher> {
        self.watcher.as_ref()
    }
}

#[async_trait]
impl Dispose for LiveResourceSet {
    /// Stops the watcher, closes the counters, then disposes the sink once
    /// in-flight reports have finished.
    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(watcher) = &self.watcher {
            watcher.dispose().await;
        }
        self.counters.close();
        self.sink.dispose().await;
        tracing::debug!(generation = self.generation, "Resource set disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::counters::{CounterSpec, MemoryCounterSource};
    use shared::events::ChannelEventSource;
    use shared::sink::MemorySinkFactory;

    fn collaborators(sinks: &Arc<MemorySinkFactory>, counters: &Arc<MemoryCounterSource>) -> Collaborators {
        Collaborators {
            sink_factory: Arc::clone(sinks) as Arc<dyn SinkFactory>,
            counter_source: Arc::clone(counters) as Arc<dyn CounterSource>,
            event_source: Arc::new(ChannelEventSource::new(["Application"])),
        }
    }

    fn noop_handler() -> LogHandler {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_dispose_releases_everything_once() {
        let sinks = Arc::new(MemorySinkFactory::new());
        let counters = Arc::new(
            MemoryCounterSource::new().with_counter("Processor", "_Total", "% Processor Time", 5.0),
        );
        let config = AgentConfiguration::new(
            "key",
            vec![CounterSpec::parse(r"Processor(_Total)\% Processor Time|CPU").unwrap()],
            Duration::from_secs(15),
        );

        let set = LiveResourceSet::build(
            1,
            AgentMode::Polling,
            &config,
            &collaborators(&sinks, &counters),
            &noop_handler(),
            None,
        )
        .unwrap();
        assert_eq!(set.counters().len(), 1);
        assert!(set.watcher().is_none());

        set.dispose().await;
        set.dispose().await;

        assert!(set.is_disposed());
        assert_eq!(counters.close_count(), 1);
        assert_eq!(sinks.latest().unwrap().flush_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_counter_fails_build() {
        let sinks = Arc::new(MemorySinkFactory::new());
        let counters = Arc::new(MemoryCounterSource::new());
        let config = AgentConfiguration::new(
            "key",
            vec![CounterSpec::parse(r"Nope\Missing").unwrap()],
            Duration::from_secs(15),
        );

        let result = LiveResourceSet::build(
            1,
            AgentMode::Polling,
            &config,
            &collaborators(&sinks, &counters),
            &noop_handler(),
            None,
        );

        assert!(matches!(result, Err(AgentError::Counter(_))));
    }

    #[tokio::test]
    async fn test_event_driven_set_subscribes() {
        let sinks = Arc::new(MemorySinkFactory::new());
        let counters = Arc::new(MemoryCounterSource::new());
        let config = AgentConfiguration::new("key", Vec::new(), Duration::from_secs(15));

        let set = LiveResourceSet::build(
            1,
            AgentMode::EventDriven,
            &config,
            &collaborators(&sinks, &counters),
            &noop_handler(),
            None,
        )
        .unwrap();

        assert!(set.watcher().is_some_and(EventWatcher::is_enabled));
        set.dispose().await;
        assert!(set.watcher().is_some_and(|w| !w.is_enabled()));
    }
}
