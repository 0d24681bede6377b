//! Counter source trait and an in-memory implementation.
//!
//! A `CounterSource` opens sampleable handles for a category/instance/metric
//! triple. Opening fails when the combination does not exist on the host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// A counter could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Counter '{category}({instance})\\{metric}' is unavailable: {reason}")]
pub struct CounterUnavailableError {
    /// Requested category.
    pub category: String,
    /// Requested instance.
    pub instance: String,
    /// Requested metric.
    pub metric: String,
    /// Why the counter could not be opened.
    pub reason: String,
}

impl CounterUnavailableError {
    /// Creates an error for the given counter triple.
    #[must_use]
    pub fn new(category: &str, instance: &str, metric: &str, reason: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            instance: instance.to_string(),
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while sampling an open counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterError {
    /// The sampler was disposed.
    #[error("Counter has been disposed")]
    Disposed,

    /// The sampler's lock was poisoned by a panicking reader.
    #[error("Failed to acquire lock on counter")]
    LockError,

    /// The underlying counter could not produce a value.
    #[error("Sampling failed: {0}")]
    SampleFailed(String),
}

/// An open, sampleable counter.
pub trait CounterHandle: Send {
    /// Draws the next value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying counter cannot be read.
    fn sample(&mut self) -> Result<f64, CounterError>;

    /// Releases the underlying counter. Called at most once.
    fn close(&mut self) {}
}

/// Opens counters by category, instance, and metric.
pub trait CounterSource: Send + Sync {
    /// Opens a counter.
    ///
    /// # Errors
    ///
    /// Returns `CounterUnavailableError` if the combination does not exist.
    fn open(
        &self,
        category: &str,
        instance: &str,
        metric: &str,
    ) -> Result<Box<dyn CounterHandle>, CounterUnavailableError>;
}

#[derive(Debug)]
struct MemoryCounter {
    bits: AtomicU64,
    removed: AtomicBool,
}

type CounterKey = (String, String, String);

/// In-memory counter source.
///
/// Counters are registered up front and their values can be changed while
/// handles are open. Open and close calls are counted so tests can check
/// that every opened handle is released exactly once.
///
/// # Example
///
/// ```
/// use shared::counters::{CounterSource, MemoryCounterSource};
///
/// let source = MemoryCounterSource::new().with_counter("Memory", "", "Available MBytes", 512.0);
/// let mut handle = source.open("Memory", "", "Available MBytes").unwrap();
///
/// assert_eq!(handle.sample().unwrap(), 512.0);
/// assert!(source.open("Memory", "", "Missing").is_err());
/// ```
#[derive(Debug, Default)]
pub struct MemoryCounterSource {
    counters: RwLock<HashMap<CounterKey, Arc<MemoryCounter>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MemoryCounterSource {
    /// Creates a source with no counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a counter with an initial value.
    #[must_use]
    pub fn with_counter(self, category: &str, instance: &str, metric: &str, value: f64) -> Self {
        self.set_value(category, instance, metric, value);
        self
    }

    /// Sets (or registers) a counter's current value.
    pub fn set_value(&self, category: &str, instance: &str, metric: &str, value: f64) {
        let key = (category.to_string(), instance.to_string(), metric.to_string());
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let counter = counters.entry(key).or_insert_with(|| {
            Arc::new(MemoryCounter {
                bits: AtomicU64::new(0),
                removed: AtomicBool::new(false),
            })
        });
        counter.bits.store(value.to_bits(), Ordering::SeqCst);
        counter.removed.store(false, Ordering::SeqCst);
    }

    /// Removes a counter. Open handles fail on their next sample.
    pub fn remove(&self, category: &str, instance: &str, metric: &str) {
        let key = (category.to_string(), instance.to_string(), metric.to_string());
        let mut counters = self
            .counters
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(counter) = counters.remove(&key) {
            counter.removed.store(true, Ordering::SeqCst);
        }
    }

    /// Number of handles opened so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of handles closed so far.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.open_count().saturating_sub(self.close_count())
    }
}

impl CounterSource for MemoryCounterSource {
    fn open(
        &self,
        category: &str,
        instance: &str,
        metric: &str,
    ) -> Result<Box<dyn CounterHandle>, CounterUnavailableError> {
        let key = (category.to_string(), instance.to_string(), metric.to_string());
        let counters = self
            .counters
            .read()
            .map_err(|_| CounterUnavailableError::new(category, instance, metric, "lock poisoned"))?;

        let counter = counters.get(&key).cloned().ok_or_else(|| {
            CounterUnavailableError::new(category, instance, metric, "no such counter")
        })?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCounterHandle {
            counter,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MemoryCounterHandle {
    counter: Arc<MemoryCounter>,
    closed: Arc<AtomicUsize>,
}

impl CounterHandle for MemoryCounterHandle {
    fn sample(&mut self) -> Result<f64, CounterError> {
        if self.counter.removed.load(Ordering::SeqCst) {
            return Err(CounterError::SampleFailed("counter was removed".to_string()));
        }
        Ok(f64::from_bits(self.counter.bits.load(Ordering::SeqCst)))
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
