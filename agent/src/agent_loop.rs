//! The configuration-reactive agent loop.
//!
//! `ReloadableAgentLoop` owns the current [`LiveResourceSet`] and runs one of
//! two loop shapes over it:
//!
//! - **polling**: every check interval, sample each counter in configuration
//!   order and report one metric per counter;
//! - **event-driven**: forward every qualifying event-log record as an error
//!   trace.
//!
//! Configuration changes rebuild the whole set under the reload lock and
//! install it with a single atomic swap. The superseded set is disposed
//! exactly once, after its in-flight reports have finished. A change that
//! cannot be applied leaves the current set untouched.
//!
//! Event deliveries arrive on the watcher's task and are queued on a bounded
//! channel; a single pump task drains it, so every report goes through the
//! same current-set lookup as the polling path. A reload's new watcher takes
//! over from the current one, so an event published during the reload is
//! forwarded once.

use async_trait::async_trait;
use shared::config::{
    AgentConfiguration, ConfigError, ConfigRevision, DEFAULT_CHECK_INTERVAL,
};
use shared::counters::{CounterError, CounterUnavailableError};
use shared::events::{EventSourceError, LogHandler};
use shared::models::{RetrievedLogRecord, TelemetryRecord};
use shared::sink::SinkError;
use shared::swap::ResourceSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::AgentMode;
use crate::resources::{Collaborators, LiveResourceSet, TelemetryReporter};
use crate::state::AgentStatus;

/// Capacity of the queue between the event watcher and the pump task.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Errors raised while starting the loop or applying a configuration.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The configuration snapshot is malformed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The sink could not be created.
    #[error("Failed to create telemetry sink: {0}")]
    Sink(#[from] SinkError),

    /// A configured counter could not be opened.
    #[error("Failed to open counter: {0}")]
    Counter(#[from] CounterUnavailableError),

    /// The event log could not be subscribed to.
    #[error("Failed to subscribe to event log: {0}")]
    Events(#[from] EventSourceError),

    /// `start` was called on a running loop.
    #[error("Agent loop is already running")]
    AlreadyRunning,

    /// A configuration change arrived while the loop was stopped.
    #[error("Agent loop is not running")]
    NotRunning,
}

struct RunningTasks {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs the sampling or event-forwarding path and reacts to configuration changes.
pub struct ReloadableAgentLoop {
    mode: AgentMode,
    collaborators: Collaborators,
    current: ResourceSwap<LiveResourceSet>,
    reload_lock: Mutex<()>,
    running: Mutex<Option<RunningTasks>>,
    last_generation: AtomicU64,
    handler: LogHandler,
    events: Arc<Mutex<mpsc::Receiver<RetrievedLogRecord>>>,
    status: Arc<AgentStatus>,
}

impl std::fmt::Debug for ReloadableAgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadableAgentLoop")
            .field("mode", &self.mode)
            .field("generation", &self.last_generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ReloadableAgentLoop {
    /// Creates a stopped loop.
    #[must_use]
    pub fn new(mode: AgentMode, collaborators: Collaborators, status: Arc<AgentStatus>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let queue_status = Arc::clone(&status);
        let handler: LogHandler = Arc::new(move |record| match tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                queue_status.record_event_dropped();
                tracing::warn!(source = %record.source, event_id = record.event_id, "Event queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        });

        Self {
            mode,
            collaborators,
            current: ResourceSwap::empty(),
            reload_lock: Mutex::new(()),
            running: Mutex::new(None),
            last_generation: AtomicU64::new(0),
            handler,
            events: Arc::new(Mutex::new(rx)),
            status,
        }
    }

    /// Loop shape.
    #[must_use]
    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    /// Shared status counters.
    #[must_use]
    pub fn status(&self) -> &Arc<AgentStatus> {
        &self.status
    }

    /// The current resource set, if the loop is running.
    #[must_use]
    pub fn current(&self) -> Option<Arc<LiveResourceSet>> {
        self.current.load()
    }

    /// Returns true while a resource set is installed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.current.is_empty()
    }

    /// Builds the initial resource set from `config` and starts the loop task.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop is already running or the initial
    /// resource set cannot be built. Nothing is left running on error.
    pub async fn start(self: &Arc<Self>, config: &AgentConfiguration) -> Result<(), AgentError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AgentError::AlreadyRunning);
        }

        {
            let _reload = self.reload_lock.lock().await;
            let set = self.build(config)?;
            self.install(set).await;
        }

        let token = CancellationToken::new();
        let task = match self.mode {
            AgentMode::Polling => tokio::spawn(Arc::clone(self).run_polling(token.clone())),
            AgentMode::EventDriven => tokio::spawn(Arc::clone(self).run_event_pump(token.clone())),
        };
        *running = Some(RunningTasks {
            token,
            tasks: vec![task],
        });
        self.status.set_running(true);

        tracing::info!(
            mode = %self.mode,
            counters = config.counter_specs.len(),
            interval_secs = config.check_interval.as_secs(),
            "Agent loop started"
        );
        Ok(())
    }

    /// Rebuilds and installs the resource set for a new configuration.
    ///
    /// Concurrent calls are serialized. On success the previous set has been
    /// disposed and the new generation is returned. On failure the previous
    /// set stays current and the error is reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop is not running or the new set cannot be built.
    pub async fn on_configuration_changed(
        &self,
        config: &AgentConfiguration,
    ) -> Result<u64, AgentError> {
        let _reload = self.reload_lock.lock().await;
        if self.current.is_empty() {
            return Err(AgentError::NotRunning);
        }

        let set = match self.build(config) {
            Ok(set) => set,
            Err(e) => {
                self.reject(&e).await;
                return Err(e);
            }
        };
        let generation = self.install(set).await;
        self.status.record_reload_applied();

        tracing::info!(
            generation,
            counters = config.counter_specs.len(),
            "Configuration change applied"
        );
        Ok(generation)
    }

    /// Applies a published settings revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision carries an unparseable document, the
    /// document does not describe a valid configuration, or the reload fails.
    pub async fn apply_revision(&self, revision: &ConfigRevision) -> Result<u64, AgentError> {
        let config = match &revision.settings {
            Ok(settings) => AgentConfiguration::from_settings(settings),
            Err(e) => Err(e.clone()),
        };
        match config {
            Ok(config) => self.on_configuration_changed(&config).await,
            Err(e) => {
                let e = AgentError::Config(e);
                let _reload = self.reload_lock.lock().await;
                self.reject(&e).await;
                Err(e)
            }
        }
    }

    /// Applies every revision published on `revisions` until `token` is cancelled.
    pub fn watch_configuration(
        self: &Arc<Self>,
        mut revisions: watch::Receiver<ConfigRevision>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let revision = revisions.borrow_and_update().clone();
                if let Err(e) = agent.apply_revision(&revision).await {
                    tracing::debug!(revision = revision.revision, error = %e, "Settings revision not applied");
                }
            }
        })
    }

    /// Samples every counter of the current set once, in configuration order.
    ///
    /// Returns the number of metrics reported. A set replaced part-way through
    /// the tick ends the tick early.
    pub async fn tick(&self) -> usize {
        let Some(set) = self.current.load() else {
            return 0;
        };
        if !set.sink().is_enabled() {
            return 0;
        }

        let mut emitted = 0;
        for sampler in set.counters() {
            let value = match sampler.next_value() {
                Ok(value) => value,
                Err(CounterError::Disposed) => {
                    tracing::debug!(generation = set.generation(), "Resource set replaced during tick");
                    break;
                }
                Err(e) => {
                    tracing::warn!(counter = %sampler.spec(), error = %e, "Failed to sample counter");
                    continue;
                }
            };

            match set
                .sink()
                .report(TelemetryRecord::metric(sampler.friendly_name(), value))
                .await
            {
                Ok(()) => {
                    emitted += 1;
                    self.status.record_metric();
                }
                Err(SinkError::Disposed) => break,
                Err(e) => {
                    tracing::warn!(counter = %sampler.spec(), error = %e, "Failed to report metric");
                }
            }
        }
        emitted
    }

    /// Stops the loop task and disposes the current resource set.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        let Some(tasks) = running.take() else {
            return;
        };

        tasks.token.cancel();
        for task in tasks.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Agent loop task ended abnormally");
            }
        }

        let _reload = self.reload_lock.lock().await;
        if let Some(retired) = self.current.take() {
            retired.dispose().await;
        }
        self.status.set_running(false);

        tracing::info!(mode = %self.mode, "Agent loop stopped");
    }

    /// Builds the next set. Callers hold the reload lock.
    fn build(&self, config: &AgentConfiguration) -> Result<LiveResourceSet, AgentError> {
        let generation = self.last_generation.load(Ordering::SeqCst) + 1;
        let previous = self.current.load();
        let set = LiveResourceSet::build(
            generation,
            self.mode,
            config,
            &self.collaborators,
            &self.handler,
            previous.as_deref(),
        )?;
        self.last_generation.store(generation, Ordering::SeqCst);
        Ok(set)
    }

    /// Installs `set` and disposes whatever it replaced. Callers hold the reload lock.
    async fn install(&self, set: LiveResourceSet) -> u64 {
        let generation = set.generation();
        let counters = set.counters().len();

        if let Some(retired) = self.current.swap(set) {
            let previous = retired.resource().generation();
            retired.dispose().await;
            tracing::debug!(previous, generation, "Previous resource set disposed");
        }
        self.status.record_installed(generation, counters);
        generation
    }

    /// Reports a rejected configuration through the current sink. Callers hold the reload lock.
    async fn reject(&self, error: &AgentError) {
        tracing::error!(error = %error, "Configuration change rejected, keeping current resources");
        self.status.record_reload_rejected(&error.to_string());

        if let Some(set) = self.current.load() {
            let record = TelemetryRecord::exception(error).with_tag("Operation", "reload");
            if let Err(e) = set.sink().report(record).await {
                tracing::debug!(error = %e, "Could not report rejected configuration");
            }
        }
    }

    fn current_interval(&self) -> Duration {
        self.current
            .load()
            .map(|set| set.check_interval())
            .filter(|period| !period.is_zero())
            .unwrap_or(DEFAULT_CHECK_INTERVAL)
    }

    async fn run_polling(self: Arc<Self>, token: CancellationToken) {
        let mut period = self.current_interval();
        let mut ticker = skipping(interval(period));

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let emitted = self.tick().await;
            tracing::trace!(emitted, "Counter tick complete");

            let next = self.current_interval();
            if next != period {
                tracing::info!(interval_secs = next.as_secs(), "Check interval changed");
                period = next;
                ticker = skipping(interval_at(Instant::now() + period, period));
            }
        }
    }

    async fn run_event_pump(self: Arc<Self>, token: CancellationToken) {
        let mut events = self.events.lock().await;

        loop {
            let record = tokio::select! {
                biased;
                () = token.cancelled() => break,
                record = events.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };
            self.forward(record).await;
        }

        // Records accepted before cancellation still go out through the current sink.
        while let Ok(record) = events.try_recv() {
            self.forward(record).await;
        }
    }

    async fn forward(&self, record: RetrievedLogRecord) {
        match self.report_current(record.into_trace()).await {
            Ok(()) => self.status.record_event_forwarded(),
            Err(e) => tracing::debug!(error = %e, "Event record not forwarded"),
        }
    }

    /// Reports through the current set's sink. A set that is replaced between
    /// the lookup and the report does not lose the record; it goes to the
    /// replacement instead.
    async fn report_current(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        loop {
            let Some(set) = self.current.load() else {
                return Err(SinkError::Disposed);
            };
            match set.sink().report(record.clone()).await {
                Err(SinkError::Disposed)
                    if self
                        .current
                        .load()
                        .is_some_and(|now| now.generation() != set.generation()) => {}
                result => return result,
            }
        }
    }
}

fn skipping(mut interval: Interval) -> Interval {
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

#[async_trait]
impl TelemetryReporter for ReloadableAgentLoop {
    /// Reports through the sink of the current resource set.
    async fn report(&self, record: TelemetryRecord) -> Result<(), SinkError> {
        self.report_current(record).await
    }
}
