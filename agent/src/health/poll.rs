//! Health poll loop.
//!
//! Every tick queries aggregate cluster health and reports one availability
//! record per application, in the order the query returned them. When the
//! client handle turns out to have been closed by its owner the tick is
//! abandoned and the handle is replaced, so the next tick runs on a fresh one.
//! Any other query failure abandons only the current tick.

use shared::models::{ApplicationHealthState, HealthState, TelemetryRecord};
use shared::swap::{ResourceSwap, SwapOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{HealthClientFactory, HealthClientHandle, HealthQueryError};
use crate::resources::TelemetryReporter;
use crate::state::AgentStatus;

/// Test name attached to every availability record.
pub const AVAILABILITY_TEST_NAME: &str = "Vaktr Watchdog";

/// Errors returned by a health tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthLoopError {
    /// The query failed; the tick was abandoned.
    #[error("Health query failed: {0}")]
    Query(#[source] HealthQueryError),

    /// A closed client could not be replaced; the loop cannot continue.
    #[error("No replacement health client could be created: {0}")]
    ClientUnavailable(#[source] HealthQueryError),

    /// The loop was shut down.
    #[error("Health poll loop has been shut down")]
    Stopped,
}

/// What one successful tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Availability was reported for this many applications.
    Reported {
        /// Number of applications reported.
        applications: usize,
    },
    /// The client handle was closed and has been replaced; nothing was reported.
    ClientReplaced,
}

/// Periodically reports application availability.
pub struct HealthPollLoop {
    client: ResourceSwap<HealthClientHandle>,
    factory: Arc<dyn HealthClientFactory>,
    reporter: Arc<dyn TelemetryReporter>,
    interval: Duration,
    next_client_id: AtomicU64,
    status: Arc<AgentStatus>,
}

impl std::fmt::Debug for HealthPollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthPollLoop")
            .field("client", &self.client.load().map(|c| c.id()))
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl HealthPollLoop {
    /// Creates a loop with a fresh client from `factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial client cannot be created.
    pub fn new(
        factory: Arc<dyn HealthClientFactory>,
        reporter: Arc<dyn TelemetryReporter>,
        interval: Duration,
        status: Arc<AgentStatus>,
    ) -> Result<Self, HealthQueryError> {
        let client = HealthClientHandle::new(1, factory.create()?);
        Ok(Self {
            client: ResourceSwap::new(client),
            factory,
            reporter,
            interval,
            next_client_id: AtomicU64::new(2),
            status,
        })
    }

    /// Id of the installed client handle, if any.
    #[must_use]
    pub fn client_id(&self) -> Option<u64> {
        self.client.load().map(|c| c.id())
    }

    /// Runs one tick.
    ///
    /// # Errors
    ///
    /// Returns `HealthLoopError::Query` if the query failed (the next tick is
    /// unaffected), `HealthLoopError::ClientUnavailable` if a closed handle
    /// could not be replaced, or `HealthLoopError::Stopped` after shutdown.
    pub async fn tick(&self) -> Result<TickOutcome, HealthLoopError> {
        let Some(handle) = self.client.load() else {
            return Err(HealthLoopError::Stopped);
        };

        match handle.client().cluster_health().await {
            Ok(health) => {
                for app in &health.applications {
                    self.report_application(app).await;
                }
                self.status.record_health_tick();
                Ok(TickOutcome::Reported {
                    applications: health.applications.len(),
                })
            }
            Err(HealthQueryError::HandleClosed) => {
                tracing::info!(client = handle.id(), "Health client closed, replacing it");
                self.replace_client(&handle).await?;
                Ok(TickOutcome::ClientReplaced)
            }
            Err(e) => {
                let record = TelemetryRecord::exception(&e).with_tag("Operation", "health_query");
                if let Err(report_error) = self.reporter.report(record).await {
                    tracing::debug!(error = %report_error, "Could not report health query failure");
                }
                Err(HealthLoopError::Query(e))
            }
        }
    }

    /// Runs ticks every interval until `token` is cancelled, then disposes the client.
    ///
    /// # Errors
    ///
    /// Returns `HealthLoopError::ClientUnavailable` if the loop had to stop
    /// because a closed client could not be replaced.
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<(), HealthLoopError> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval_secs = self.interval.as_secs(), "Health poll loop started");

        let result = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break Ok(()),
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(TickOutcome::Reported { applications }) => {
                    tracing::debug!(applications, "Health tick complete");
                }
                Ok(TickOutcome::ClientReplaced) => {}
                Err(HealthLoopError::Query(e)) => {
                    tracing::warn!(error = %e, "Health tick abandoned");
                }
                Err(HealthLoopError::Stopped) => break Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "Health poll loop stopping");
                    self.status.record_error(&e.to_string());
                    break Err(e);
                }
            }
        };

        self.shutdown().await;
        result
    }

    /// Disposes the installed client. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(retired) = self.client.take() {
            retired.dispose().await;
            tracing::info!("Health poll loop stopped");
        }
    }

    async fn replace_client(
        &self,
        closed: &Arc<HealthClientHandle>,
    ) -> Result<(), HealthLoopError> {
        let client = match self.factory.create() {
            Ok(client) => client,
            Err(e) => {
                let record =
                    TelemetryRecord::exception(&e).with_tag("Operation", "health_client");
                if let Err(report_error) = self.reporter.report(record).await {
                    tracing::debug!(error = %report_error, "Could not report health client failure");
                }
                return Err(HealthLoopError::ClientUnavailable(e));
            }
        };

        let id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
        match self
            .client
            .compare_and_swap(closed, HealthClientHandle::new(id, client))
        {
            SwapOutcome::Replaced(retired) => {
                retired.dispose().await;
                self.status.record_health_client_replaced();
                tracing::info!(client = id, "Health client replaced");
            }
            SwapOutcome::Lost(unused) => {
                unused.dispose().await;
                tracing::debug!("Health client already replaced by another caller");
            }
        }
        Ok(())
    }

    async fn report_application(&self, app: &ApplicationHealthState) {
        let success = app.is_available();
        let message = (!success)
            .then(|| format!("aggregated health state is {}", app.aggregated_state));

        let availability = TelemetryRecord::availability(
            app.display_name(),
            AVAILABILITY_TEST_NAME,
            success,
            message,
        );
        if let Err(e) = self.reporter.report(availability).await {
            tracing::debug!(app = %app.name, error = %e, "Availability not reported");
            return;
        }

        if app.aggregated_state == HealthState::Ok {
            return;
        }
        for service in app
            .services
            .iter()
            .filter(|service| service.state != HealthState::Ok)
        {
            let record = TelemetryRecord::Health {
                app_name: app.display_name().to_string(),
                service_name: service.service_name.clone(),
                instance: service.instance.clone(),
                source: service.source.clone(),
                property: service.property.clone(),
                state: service.state,
            };
            if let Err(e) = self.reporter.report(record).await {
                tracing::debug!(app = %app.name, error = %e, "Service health not reported");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentMode;
    use crate::health::MemoryHealthClientFactory;
    use shared::models::{ClusterHealth, ServiceHealthState};
    use shared::sink::{MemorySink, SinkHandle};

    fn poll_loop(factory: &Arc<MemoryHealthClientFactory>, sink: &Arc<MemorySink>) -> HealthPollLoop {
        HealthPollLoop::new(
            Arc::clone(factory) as Arc<dyn HealthClientFactory>,
            Arc::new(SinkHandle::new(Arc::clone(sink) as _)),
            Duration::from_secs(30),
            Arc::new(AgentStatus::new(AgentMode::Polling)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unhealthy_app_drills_down_to_services() {
        let health = ClusterHealth {
            aggregated_state: HealthState::Error,
            applications: vec![ApplicationHealthState::new("\\Orders", HealthState::Error)
                .with_service(ServiceHealthState {
                    service_name: "Orders/Web".to_string(),
                    instance: "1".to_string(),
                    source: "System.FM".to_string(),
                    property: "State".to_string(),
                    state: HealthState::Error,
                })
                .with_service(ServiceHealthState {
                    service_name: "Orders/Api".to_string(),
                    instance: "2".to_string(),
                    source: "System.FM".to_string(),
                    property: "State".to_string(),
                    state: HealthState::Ok,
                })],
        };
        let factory = Arc::new(MemoryHealthClientFactory::new(health));
        let sink = Arc::new(MemorySink::new());
        let health_loop = poll_loop(&factory, &sink);

        let outcome = health_loop.tick().await.unwrap();

        assert_eq!(outcome, TickOutcome::Reported { applications: 1 });
        let records = sink.records();
        assert_eq!(records.len(), 2);
        match &records[0] {
            TelemetryRecord::Availability {
                app_name,
                test_name,
                success,
                message,
                ..
            } => {
                assert_eq!(app_name, "Orders");
                assert_eq!(test_name, AVAILABILITY_TEST_NAME);
                assert!(!success);
                assert_eq!(message.as_deref(), Some("aggregated health state is Error"));
            }
            other => panic!("unexpected record: {other:?}"),
        }
        match &records[1] {
            TelemetryRecord::Health {
                service_name,
                state,
                ..
            } => {
                assert_eq!(service_name, "Orders/Web");
                assert_eq!(*state, HealthState::Error);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_failure_abandons_tick_only() {
        let factory = Arc::new(MemoryHealthClientFactory::new(ClusterHealth::default()));
        let sink = Arc::new(MemorySink::new());
        let health_loop = poll_loop(&factory, &sink);
        factory
            .latest()
            .unwrap()
            .fail_next(HealthQueryError::Query("timeout".to_string()));

        let first = health_loop.tick().await;
        let second = health_loop.tick().await;

        assert!(matches!(first, Err(HealthLoopError::Query(_))));
        assert_eq!(second, Ok(TickOutcome::Reported { applications: 0 }));
        assert_eq!(health_loop.client_id(), Some(1));
        assert_eq!(sink.records()[0].kind(), "exception");
    }

    #[tokio::test]
    async fn test_unreplaceable_client_stops_loop() {
        let factory = Arc::new(MemoryHealthClientFactory::new(ClusterHealth::default()));
        let sink = Arc::new(MemorySink::new());
        let health_loop = Arc::new(poll_loop(&factory, &sink));
        factory.latest().unwrap().close_by_owner();
        factory.set_unavailable(true);

        let result = Arc::clone(&health_loop).run(CancellationToken::new()).await;

        assert!(matches!(result, Err(HealthLoopError::ClientUnavailable(_))));
        assert_eq!(sink.records()[0].kind(), "exception");
        assert!(health_loop.client_id().is_none());
        assert_eq!(factory.clients()[0].dispose_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_stop_next_tick() {
        let factory = Arc::new(MemoryHealthClientFactory::new(ClusterHealth {
            aggregated_state: HealthState::Ok,
            applications: vec![ApplicationHealthState::new("fabric:/A", HealthState::Ok)],
        }));
        let sink = Arc::new(MemorySink::new());
        let health_loop = Arc::new(poll_loop(&factory, &sink));
        let client = factory.latest().unwrap();
        client.fail_next(HealthQueryError::Query("timeout".to_string()));

        let token = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&health_loop).run(token.clone()));
        tokio::time::sleep(Duration::from_secs(31)).await;
        token.cancel();

        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(client.query_count(), 2);
        let kinds: Vec<_> = sink.records().iter().map(TelemetryRecord::kind).collect();
        assert_eq!(kinds, vec!["exception", "availability"]);
        assert_eq!(client.dispose_calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_disposes_client_once() {
        let factory = Arc::new(MemoryHealthClientFactory::new(ClusterHealth::default()));
        let sink = Arc::new(MemorySink::new());
        let health_loop = poll_loop(&factory, &sink);

        health_loop.shutdown().await;
        health_loop.shutdown().await;

        assert_eq!(factory.clients()[0].dispose_calls(), 1);
        assert_eq!(health_loop.tick().await, Err(HealthLoopError::Stopped));
    }
}
