//! Application state module.
//!
//! Defines the status counters the loops update and the state shared with
//! route handlers.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::AgentMode;

/// Live counters describing what the agent has done so far.
#[derive(Debug)]
pub struct AgentStatus {
    mode: AgentMode,
    running: AtomicBool,
    generation: AtomicU64,
    counters: AtomicUsize,
    reloads_applied: AtomicU64,
    reloads_rejected: AtomicU64,
    metrics_emitted: AtomicU64,
    events_forwarded: AtomicU64,
    events_dropped: AtomicU64,
    health_ticks: AtomicU64,
    health_client_replacements: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`AgentStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Loop shape.
    pub mode: AgentMode,
    /// Whether the agent loop is running.
    pub running: bool,
    /// Generation of the current resource set (0 before the first one).
    pub generation: u64,
    /// Number of counters in the current resource set.
    pub counters: usize,
    /// Configuration changes that were applied.
    pub reloads_applied: u64,
    /// Configuration changes that were discarded.
    pub reloads_rejected: u64,
    /// Metric records sent.
    pub metrics_emitted: u64,
    /// Event-log records sent.
    pub events_forwarded: u64,
    /// Event-log records dropped because the queue was full.
    pub events_dropped: u64,
    /// Completed health poll ticks.
    pub health_ticks: u64,
    /// Health client handles replaced after being closed.
    pub health_client_replacements: u64,
    /// Most recent error message, if any.
    pub last_error: Option<String>,
}

impl AgentStatus {
    /// Creates zeroed status for `mode`.
    #[must_use]
    pub fn new(mode: AgentMode) -> Self {
        Self {
            mode,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            counters: AtomicUsize::new(0),
            reloads_applied: AtomicU64::new(0),
            reloads_rejected: AtomicU64::new(0),
            metrics_emitted: AtomicU64::new(0),
            events_forwarded: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            health_ticks: AtomicU64::new(0),
            health_client_replacements: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Loop shape.
    #[must_use]
    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn record_installed(&self, generation: u64, counters: usize) {
        self.generation.store(generation, Ordering::SeqCst);
        self.counters.store(counters, Ordering::SeqCst);
    }

    pub(crate) fn record_reload_applied(&self) {
        self.reloads_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload_rejected(&self, error: &str) {
        self.reloads_rejected.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    pub(crate) fn record_metric(&self) {
        self.metrics_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_forwarded(&self) {
        self.events_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_tick(&self) {
        self.health_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_client_replaced(&self) {
        self.health_client_replacements
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self, error: &str) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    /// Copies the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            mode: self.mode,
            running: self.running.load(Ordering::SeqCst),
            generation: self.generation.load(Ordering::SeqCst),
            counters: self.counters.load(Ordering::SeqCst),
            reloads_applied: self.reloads_applied.load(Ordering::Relaxed),
            reloads_rejected: self.reloads_rejected.load(Ordering::Relaxed),
            metrics_emitted: self.metrics_emitted.load(Ordering::Relaxed),
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            health_ticks: self.health_ticks.load(Ordering::Relaxed),
            health_client_replacements: self.health_client_replacements.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    status: Arc<AgentStatus>,
}

impl AppState {
    /// Creates a new application state around shared status.
    #[must_use]
    pub fn new(status: Arc<AgentStatus>) -> Self {
        Self { status }
    }

    /// Returns the agent status.
    #[must_use]
    pub fn status(&self) -> &AgentStatus {
        &self.status
    }
}
