//! In-memory health client.

use async_trait::async_trait;
use shared::models::ClusterHealth;
use shared::swap::Dispose;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{HealthClient, HealthClientFactory, HealthQueryError};

#[derive(Debug, Default)]
struct ClientState {
    closed: AtomicBool,
    disposed: AtomicBool,
    dispose_calls: AtomicUsize,
    queries: AtomicUsize,
    scripted_failures: Mutex<VecDeque<HealthQueryError>>,
}

/// Health client that answers from a shared in-memory snapshot.
///
/// Clones share the same handle state.
#[derive(Debug, Clone)]
pub struct MemoryHealthClient {
    health: Arc<Mutex<ClusterHealth>>,
    state: Arc<ClientState>,
}

impl MemoryHealthClient {
    /// Creates a client answering with `health`.
    #[must_use]
    pub fn new(health: ClusterHealth) -> Self {
        Self::shared(Arc::new(Mutex::new(health)))
    }

    fn shared(health: Arc<Mutex<ClusterHealth>>) -> Self {
        Self {
            health,
            state: Arc::new(ClientState::default()),
        }
    }

    /// Makes the next query fail with `error`. Failures queue up in order.
    pub fn fail_next(&self, error: HealthQueryError) {
        self.state
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Closes the handle from the owner's side without disposing it.
    pub fn close_by_owner(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    /// Number of queries answered or failed so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    /// Number of times `dispose` was called.
    #[must_use]
    pub fn dispose_calls(&self) -> usize {
        self.state.dispose_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthClient for MemoryHealthClient {
    async fn cluster_health(&self) -> Result<ClusterHealth, HealthQueryError> {
        self.state.queries.fetch_add(1, Ordering::SeqCst);

        if self.state.closed.load(Ordering::SeqCst) {
            return Err(HealthQueryError::HandleClosed);
        }
        let scripted = self
            .state
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        Ok(self
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[async_trait]
impl Dispose for MemoryHealthClient {
    async fn dispose(&self) {
        self.state.dispose_calls.fetch_add(1, Ordering::SeqCst);
        if !self.state.disposed.swap(true, Ordering::SeqCst) {
            self.state.closed.store(true, Ordering::SeqCst);
        }
    }

    fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }
}

/// Creates `MemoryHealthClient`s that share one snapshot.
#[derive(Debug)]
pub struct MemoryHealthClientFactory {
    health: Arc<Mutex<ClusterHealth>>,
    clients: Mutex<Vec<MemoryHealthClient>>,
    unavailable: AtomicBool,
}

impl MemoryHealthClientFactory {
    /// Creates a factory whose clients answer with `health`.
    #[must_use]
    pub fn new(health: ClusterHealth) -> Self {
        Self {
            health: Arc::new(Mutex::new(health)),
            clients: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Replaces the snapshot every client answers with.
    pub fn set_health(&self, health: ClusterHealth) {
        *self.health.lock().unwrap_or_else(PoisonError::into_inner) = health;
    }

    /// Makes `create` fail while `unavailable` is true.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every client created so far, oldest first.
    #[must_use]
    pub fn clients(&self) -> Vec<MemoryHealthClient> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently created client.
    #[must_use]
    pub fn latest(&self) -> Option<MemoryHealthClient> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl HealthClientFactory for MemoryHealthClientFactory {
    fn create(&self) -> Result<Box<dyn HealthClient>, HealthQueryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HealthQueryError::Connect(
                "health endpoint unavailable".to_string(),
            ));
        }
        let client = MemoryHealthClient::shared(Arc::clone(&self.health));
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client.clone());
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ApplicationHealthState, HealthState};

    #[tokio::test]
    async fn test_scripted_failures_come_first() {
        let client = MemoryHealthClient::new(ClusterHealth::default());
        client.fail_next(HealthQueryError::Query("timeout".to_string()));

        assert!(client.cluster_health().await.is_err());
        assert!(client.cluster_health().await.is_ok());
        assert_eq!(client.query_count(), 2);
    }

    #[tokio::test]
    async fn test_factory_clients_share_snapshot() {
        let factory = MemoryHealthClientFactory::new(ClusterHealth::default());
        let client = factory.create().unwrap();

        factory.set_health(ClusterHealth {
            aggregated_state: HealthState::Ok,
            applications: vec![ApplicationHealthState::new("fabric:/A", HealthState::Ok)],
        });

        assert_eq!(client.cluster_health().await.unwrap().applications.len(), 1);
        assert_eq!(factory.clients().len(), 1);
    }

    #[tokio::test]
    async fn test_dispose_closes_once() {
        let client = MemoryHealthClient::new(ClusterHealth::default());

        client.dispose().await;
        client.dispose().await;

        assert!(client.is_disposed());
        assert_eq!(client.dispose_calls(), 2);
        assert_eq!(
            client.cluster_health().await,
            Err(HealthQueryError::HandleClosed)
        );
    }
}
