//! Event-log watcher.
//!
//! An `EventWatcher` owns one subscription and a background task that turns
//! each qualifying delivery into a `RetrievedLogRecord` and hands it to the
//! registered handler. Unreadable records are dropped without surfacing an
//! error so a single bad record cannot stop the watch loop.
//!
//! A watcher can hand over to a successor. From the successor's first event
//! on, the old watcher stays quiet; events published before the successor
//! subscribed are still delivered by the old watcher, even if they are only
//! drained when it is disposed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::source::{EventDelivery, EventQuery, EventSource, EventSourceError, EventStream};
use crate::models::RetrievedLogRecord;
use crate::swap::Dispose;

/// Callback invoked once per qualifying event, on the watcher's task.
pub type LogHandler = Arc<dyn Fn(RetrievedLogRecord) + Send + Sync>;

#[derive(Debug, Default)]
struct WatcherCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Sequence number from which a successor watcher delivers instead.
type Cutoff = Arc<Mutex<Option<u64>>>;

/// Live subscription to an event log.
pub struct EventWatcher {
    query: EventQuery,
    start: u64,
    cutoff: Cutoff,
    enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<WatcherCounters>,
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher")
            .field("query", &self.query)
            .field("start", &self.start)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl EventWatcher {
    /// Subscribes to `query` and starts delivering records to `handler`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the source rejects the subscription or no runtime
    /// is available to run the delivery task.
    pub fn subscribe(
        source: &dyn EventSource,
        query: EventQuery,
        handler: LogHandler,
    ) -> Result<Self, EventSourceError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EventSourceError::SubscriptionFailed(e.to_string()))?;
        let stream = source.subscribe(&query)?;
        let start = stream.start();

        let enabled = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let counters = Arc::new(WatcherCounters::default());
        let cutoff = Cutoff::default();

        let task = runtime.spawn(deliver(
            stream,
            Delivery {
                query: query.clone(),
                handler,
                cutoff: Arc::clone(&cutoff),
                counters: Arc::clone(&counters),
            },
            Arc::clone(&enabled),
            cancel.clone(),
        ));

        tracing::debug!(log = %query.log_name, min_level = %query.min_level, start, "Event watcher subscribed");

        Ok(Self {
            query,
            start,
            cutoff,
            enabled,
            cancel,
            task: Mutex::new(Some(task)),
            counters,
        })
    }

    /// Subscribes a successor to `query` and hands delivery over to it.
    ///
    /// Every event is delivered by exactly one of the two watchers: this one
    /// keeps the events published before the successor subscribed, the
    /// successor takes the rest. On error this watcher carries on unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the successor cannot subscribe.
    pub fn hand_over(
        &self,
        source: &dyn EventSource,
        query: EventQuery,
        handler: LogHandler,
    ) -> Result<Self, EventSourceError> {
        // Held across the subscription so this watcher cannot deliver an
        // event the successor will also see.
        let mut cutoff = self.cutoff.lock().unwrap_or_else(PoisonError::into_inner);
        let successor = Self::subscribe(source, query, handler)?;
        *cutoff = Some(successor.start);
        Ok(successor)
    }

    /// The query this watcher is subscribed with.
    #[must_use]
    pub fn query(&self) -> &EventQuery {
        &self.query
    }

    /// Returns true until the watcher is disposed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of records handed to the handler.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Number of unreadable records that were dropped.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dispose for EventWatcher {
    /// Stops delivery and waits for the delivery task to exit.
    async fn dispose(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Event watcher task ended abnormally");
            }
            tracing::debug!(log = %self.query.log_name, "Event watcher disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        !self.is_enabled()
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

struct Delivery {
    query: EventQuery,
    handler: LogHandler,
    cutoff: Cutoff,
    counters: Arc<WatcherCounters>,
}

impl Delivery {
    fn accept(&self, delivery: EventDelivery) {
        match delivery {
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(error = %e, "Dropping unreadable event record");
            }
            Ok(event) => {
                if !event.level.is_at_least(self.query.min_level) {
                    return;
                }
                let cutoff = *self.cutoff.lock().unwrap_or_else(PoisonError::into_inner);
                if cutoff.is_some_and(|first| event.sequence >= first) {
                    return;
                }
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                (self.handler)(event.into_record());
            }
        }
    }

    fn handed_over(&self) -> bool {
        self.cutoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Delivers what is already queued, if a successor took over.
    fn finish(&self, stream: &mut EventStream) {
        if !self.handed_over() {
            return;
        }
        while let Ok(delivery) = stream.try_recv() {
            self.accept(delivery);
        }
    }
}

async fn deliver(
    mut stream: EventStream,
    delivery: Delivery,
    enabled: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                delivery.finish(&mut stream);
                break;
            }
            next = stream.recv() => next,
        };

        let Some(next) = next else {
            tracing::debug!(log = %delivery.query.log_name, "Event stream closed");
            break;
        };
        if !enabled.load(Ordering::SeqCst) {
            if delivery.handed_over() {
                delivery.accept(next);
            }
            delivery.finish(&mut stream);
            break;
        }
        delivery.accept(next);
    }
}
