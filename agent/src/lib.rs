//! Vaktr Agent
//!
//! This crate runs the Vaktr telemetry relay: it samples host counters or
//! forwards event-log records to a telemetry sink, optionally reports cluster
//! application availability, and rebuilds its live resources whenever the
//! settings document changes.
//!
//! # Architecture
//!
//! - [`agent_loop`] - `ReloadableAgentLoop`, the polling and event-driven paths
//! - [`resources`] - the resource set built from one configuration snapshot
//! - [`health`] - the cluster health poll loop and its clients
//! - [`state`] - status counters shared with the HTTP routes
//!
//! A small Axum server exposes `/health` and `/status`.
//!
//! # Example
//!
//! ```no_run
//! use agent::run_agent;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_agent().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent_loop;
pub mod config;
pub mod health;
pub mod resources;
mod routes;
pub mod state;

pub use agent_loop::{AgentError, ReloadableAgentLoop};
pub use config::{AgentMode, Config};
pub use resources::{Collaborators, LiveResourceSet, TelemetryReporter};
pub use state::{AgentStatus, AppState, StatusSnapshot};

use anyhow::{Context, Result};
use axum::Router;
use shared::config::{AgentConfiguration, FileConfigSource};
use shared::counters::SystemCounterSource;
use shared::events::{ChannelEventSource, EventSource, JournalEventSource};
use shared::sink::TracingSinkFactory;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::health::{HealthPollLoop, SnapshotFileHealthClientFactory};

/// Runs the Vaktr agent.
///
/// This function reads its process configuration from environment variables,
/// starts the agent loop, and serves the status endpoint until SIGTERM/SIGINT.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - The settings document cannot be read or does not describe a valid configuration
/// - The initial resources cannot be built
/// - The server fails to bind to the configured address
pub async fn run_agent() -> Result<()> {
    let config = Config::from_env()?;
    run_agent_with_config(config).await
}

/// Runs the Vaktr agent with the provided process configuration.
///
/// # Errors
///
/// Returns an error if:
/// - The settings document cannot be read or does not describe a valid configuration
/// - The initial resources cannot be built
/// - The server fails to bind to the configured address
pub async fn run_agent_with_config(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;

    tracing::info!(
        mode = %config.mode,
        settings = %config.config_path.display(),
        "Vaktr agent starting"
    );

    let source = Arc::new(
        FileConfigSource::load(&config.config_path, config.config_poll_interval)
            .await
            .with_context(|| format!("Failed to load {}", config.config_path.display()))?,
    );
    let initial = match &source.current().settings {
        Ok(settings) => AgentConfiguration::from_settings(settings)?,
        Err(e) => return Err(e.clone().into()),
    };

    let (event_source, journal_reader) = event_source(&config);
    let collaborators = Collaborators {
        sink_factory: Arc::new(TracingSinkFactory),
        counter_source: Arc::new(SystemCounterSource::new()),
        event_source,
    };

    let status = Arc::new(AgentStatus::new(config.mode));
    let agent = Arc::new(ReloadableAgentLoop::new(
        config.mode,
        collaborators,
        Arc::clone(&status),
    ));
    agent.start(&initial).await?;

    let token = CancellationToken::new();
    let mut tasks = vec![
        Arc::clone(&source).spawn(token.clone()),
        agent.watch_configuration(source.subscribe(), token.clone()),
    ];

    if let Some(path) = &config.health_snapshot_path {
        let health = HealthPollLoop::new(
            Arc::new(SnapshotFileHealthClientFactory::new(path)),
            Arc::clone(&agent) as Arc<dyn TelemetryReporter>,
            config.health_interval,
            Arc::clone(&status),
        )?;
        let health_token = token.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = Arc::new(health).run(health_token).await {
                tracing::error!(error = %e, "Health reporting stopped");
            }
        }));
    }

    let app = create_router(AppState::new(status));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Listening for connections");

    let shutdown_token = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                () = shutdown_signal() => {}
                () = shutdown_token.cancelled() => {}
            }
        })
        .await?;

    token.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    agent.shutdown().await;
    if let Some(reader) = journal_reader {
        reader.abort();
    }

    tracing::info!("Agent shutdown complete");
    Ok(())
}

/// Creates the application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::status_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Both sources accept any log name, so a reload may change `EventLog.LogName`.
fn event_source(config: &Config) -> (Arc<dyn EventSource>, Option<JoinHandle<()>>) {
    if config.event_stdin {
        let journal = JournalEventSource::new();
        let reader = journal.spawn_reader(BufReader::new(tokio::io::stdin()));
        (Arc::new(journal), Some(reader))
    } else {
        (Arc::new(ChannelEventSource::any_log()), None)
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
