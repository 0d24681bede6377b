//! Live counter samplers.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

use super::source::{CounterError, CounterHandle, CounterSource, CounterUnavailableError};
use super::spec::CounterSpec;
use crate::swap::Dispose;

/// A counter spec bound to an open counter.
///
/// Opening draws one sample immediately, so an invalid category, instance,
/// or metric fails at construction rather than on the first tick.
pub struct CounterSampler {
    spec: CounterSpec,
    handle: Mutex<Option<Box<dyn CounterHandle>>>,
}

impl std::fmt::Debug for CounterSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterSampler")
            .field("spec", &self.spec)
            .field("disposed", &self.is_closed())
            .finish()
    }
}

impl CounterSampler {
    /// Opens the counter described by `spec` and validates it with one sample.
    ///
    /// # Errors
    ///
    /// Returns `CounterUnavailableError` if the counter cannot be opened or
    /// its first sample fails.
    pub fn open(
        spec: CounterSpec,
        source: &dyn CounterSource,
    ) -> Result<Self, CounterUnavailableError> {
        let mut handle = source.open(spec.category(), spec.instance(), spec.metric())?;

        if let Err(e) = handle.sample() {
            handle.close();
            return Err(CounterUnavailableError::new(
                spec.category(),
                spec.instance(),
                spec.metric(),
                e.to_string(),
            ));
        }

        Ok(Self {
            spec,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The spec this sampler was opened from.
    #[must_use]
    pub fn spec(&self) -> &CounterSpec {
        &self.spec
    }

    /// Name the samples are reported under.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        self.spec.friendly_name()
    }

    /// Draws the next value.
    ///
    /// # Errors
    ///
    /// Returns an error if the sampler was disposed or the read fails.
    pub fn next_value(&self) -> Result<f64, CounterError> {
        let mut handle = self.handle.lock().map_err(|_| CounterError::LockError)?;
        match handle.as_mut() {
            Some(handle) => handle.sample(),
            None => Err(CounterError::Disposed),
        }
    }

    /// Releases the counter. Only the first call has any effect.
    pub fn close(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut handle) = handle {
            handle.close();
            tracing::debug!(counter = %self.spec, "Counter closed");
        }
    }

    /// Returns true once the counter has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[async_trait]
impl Dispose for CounterSampler {
    async fn dispose(&self) {
        self.close();
    }

    fn is_disposed(&self) -> bool {
        self.is_closed()
    }
}

impl Drop for CounterSampler {
    fn drop(&mut self) {
        self.close();
    }
}

/// The ordered samplers derived from one configuration snapshot.
#[derive(Debug, Default)]
pub struct CounterSet {
    samplers: Vec<CounterSampler>,
}

impl CounterSet {
    /// Opens every spec in order.
    ///
    /// The batch is all-or-nothing: if any counter is unavailable, the
    /// samplers opened so far are closed and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first `CounterUnavailableError` encountered.
    pub fn open_all(
        specs: &[CounterSpec],
        source: &dyn CounterSource,
    ) -> Result<Self, CounterUnavailableError> {
        let mut samplers = Vec::with_capacity(specs.len());
        for spec in specs {
            match CounterSampler::open(spec.clone(), source) {
                Ok(sampler) => samplers.push(sampler),
                Err(e) => {
                    for sampler in &samplers {
                        sampler.close();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { samplers })
    }

    /// Samplers in configuration order.
    pub fn iter(&self) -> std::slice::Iter<'_, CounterSampler> {
        self.samplers.iter()
    }

    /// Number of samplers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    /// Returns true when no counters are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }

    /// Closes every sampler.
    pub fn close(&self) {
        for sampler in &self.samplers {
            sampler.close();
        }
    }
}

impl<'a> IntoIterator for &'a CounterSet {
    type Item = &'a CounterSampler;
    type IntoIter = std::slice::Iter<'a, CounterSampler>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::MemoryCounterSource;

    fn source() -> MemoryCounterSource {
        MemoryCounterSource::new()
            .with_counter("Processor", "_Total", "% Processor Time", 42.0)
            .with_counter("Memory", "", "Available MBytes", 1024.0)
    }

    #[test]
    fn test_open_draws_one_sample() {
        let source = source();
        let spec = CounterSpec::parse(r"Processor(_Total)\% Processor Time|CPU").unwrap();

        let sampler = CounterSampler::open(spec, &source).unwrap();

        assert_eq!(sampler.friendly_name(), "CPU");
        assert_eq!(sampler.next_value().unwrap(), 42.0);
        assert_eq!(sampler.next_value().unwrap(), 42.0);
    }

    #[test]
    fn test_open_unknown_counter_fails_fast() {
        let source = source();
        let spec = CounterSpec::parse(r"Processor(_Total)\% Idle Time|Idle").unwrap();

        let err = CounterSampler::open(spec, &source).unwrap_err();

        assert_eq!(err.metric, "% Idle Time");
        assert_eq!(source.open_count(), 0);
    }

    #[test]
    fn test_failed_first_sample_closes_handle() {
        struct Broken;
        impl CounterHandle for Broken {
            fn sample(&mut self) -> Result<f64, CounterError> {
                Err(CounterError::SampleFailed("no data".to_string()))
            }
        }
        struct BrokenSource;
        impl CounterSource for BrokenSource {
            fn open(
                &self,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<Box<dyn CounterHandle>, CounterUnavailableError> {
                Ok(Box::new(Broken))
            }
        }

        let spec = CounterSpec::parse(r"Memory\Available MBytes").unwrap();
        let err = CounterSampler::open(spec, &BrokenSource).unwrap_err();

        assert!(err.reason.contains("no data"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let source = source();
        let spec = CounterSpec::parse(r"Memory\Available MBytes").unwrap();
        let sampler = CounterSampler::open(spec, &source).unwrap();

        sampler.close();
        sampler.close();
        drop(sampler);

        assert_eq!(source.open_count(), 1);
        assert_eq!(source.close_count(), 1);
    }

    #[test]
    fn test_next_value_after_close() {
        let source = source();
        let spec = CounterSpec::parse(r"Memory\Available MBytes").unwrap();
        let sampler = CounterSampler::open(spec, &source).unwrap();

        sampler.close();

        assert_eq!(sampler.next_value(), Err(CounterError::Disposed));
        assert!(sampler.is_closed());
    }

    #[tokio::test]
    async fn test_dispose_trait_closes_once() {
        let source = source();
        let spec = CounterSpec::parse(r"Memory\Available MBytes").unwrap();
        let sampler = CounterSampler::open(spec, &source).unwrap();

        sampler.dispose().await;
        sampler.dispose().await;

        assert!(sampler.is_disposed());
        assert_eq!(source.close_count(), 1);
    }

    #[test]
    fn test_open_all_keeps_order() {
        let source = source();
        let specs = vec![
            CounterSpec::parse(r"Memory\Available MBytes|Mem").unwrap(),
            CounterSpec::parse(r"Processor(_Total)\% Processor Time|CPU").unwrap(),
        ];

        let set = CounterSet::open_all(&specs, &source).unwrap();
        let names: Vec<_> = set.iter().map(CounterSampler::friendly_name).collect();

        assert_eq!(names, vec!["Mem", "CPU"]);
    }

    #[test]
    fn test_open_all_rejects_whole_batch() {
        let source = source();
        let specs = vec![
            CounterSpec::parse(r"Memory\Available MBytes|Mem").unwrap(),
            CounterSpec::parse(r"Processor(_Total)\% Processor Time|CPU").unwrap(),
            CounterSpec::parse(r"Disk\Missing|Disk").unwrap(),
        ];

        let err = CounterSet::open_all(&specs, &source).unwrap_err();

        assert_eq!(err.category, "Disk");
        assert_eq!(source.open_count(), 2);
        assert_eq!(source.live_handles(), 0);
    }

    #[test]
    fn test_empty_set() {
        let set = CounterSet::open_all(&[], &source()).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }
}
