//! Atomic "replace and dispose previous" slot for live resources.
//!
//! A [`ResourceSwap`] holds the current instance of a resource (a sink
//! handle, a health client, a whole resource set). Installing a replacement
//! hands back the superseded instance as a [`Retired`] value, which is the
//! only way to reach its [`Dispose::dispose`]. Every superseded instance is
//! returned to exactly one caller, so it is disposed exactly once.
//!
//! # Example
//!
//! ```
//! use shared::swap::ResourceSwap;
//!
//! let slot = ResourceSwap::new(1_u32);
//! let retired = slot.swap(2).expect("slot was occupied");
//!
//! assert_eq!(*retired.resource(), 1);
//! assert_eq!(slot.load().as_deref(), Some(&2));
//! ```

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use std::sync::Arc;

/// A resource that must be released explicitly.
///
/// Implementations are idempotent: only the first call releases anything.
#[async_trait]
pub trait Dispose: Send + Sync {
    /// Releases the resource.
    async fn dispose(&self);

    /// Returns true once `dispose` has run.
    fn is_disposed(&self) -> bool;
}

/// A resource that was removed from a [`ResourceSwap`] and now belongs to the caller.
#[must_use = "a retired resource must be disposed"]
#[derive(Debug)]
pub struct Retired<T> {
    resource: Arc<T>,
}

impl<T> Retired<T> {
    /// Borrows the retired resource.
    pub fn resource(&self) -> &T {
        &self.resource
    }
}

impl<T: Dispose> Retired<T> {
    /// Disposes the retired resource, consuming the ownership token.
    pub async fn dispose(self) {
        self.resource.dispose().await;
    }
}

/// Outcome of [`ResourceSwap::compare_and_swap`].
#[derive(Debug)]
pub enum SwapOutcome<T> {
    /// The expected instance was current and has been replaced; dispose it.
    Replaced(Retired<T>),
    /// Another caller replaced the expected instance first. The proposed
    /// replacement was not installed and is handed back for disposal.
    Lost(Retired<T>),
}

/// Lock-free slot holding the current instance of a live resource.
#[derive(Debug)]
pub struct ResourceSwap<T> {
    current: ArcSwapOption<T>,
}

impl<T> ResourceSwap<T> {
    /// Creates a slot holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            current: ArcSwapOption::from_pointee(initial),
        }
    }

    /// Creates an empty slot.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Returns the current instance, if any.
    ///
    /// The returned `Arc` keeps the instance alive but does not keep it
    /// current; callers that must not observe a disposed resource use the
    /// resource's own lease mechanism.
    pub fn load(&self) -> Option<Arc<T>> {
        self.current.load_full()
    }

    /// Returns true when nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }

    /// Installs `replacement` and returns the previous instance, if any.
    pub fn swap(&self, replacement: T) -> Option<Retired<T>> {
        self.current
            .swap(Some(Arc::new(replacement)))
            .map(|resource| Retired { resource })
    }

    /// Replaces `expected` with `replacement` only if `expected` is still current.
    pub fn compare_and_swap(&self, expected: &Arc<T>, replacement: T) -> SwapOutcome<T> {
        let replacement = Arc::new(replacement);
        let previous = self
            .current
            .compare_and_swap(&Some(Arc::clone(expected)), Some(Arc::clone(&replacement)));

        match arc_swap::Guard::into_inner(previous) {
            Some(previous) if Arc::ptr_eq(&previous, expected) => SwapOutcome::Replaced(Retired {
                resource: previous,
            }),
            _ => SwapOutcome::Lost(Retired {
                resource: replacement,
            }),
        }
    }

    /// Empties the slot and returns what was installed.
    pub fn take(&self) -> Option<Retired<T>> {
        self.current.swap(None).map(|resource| Retired { resource })
    }
}

impl<T> Default for ResourceSwap<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Tracked {
        id: usize,
        disposed: AtomicBool,
        disposals: Arc<AtomicUsize>,
    }

    impl Tracked {
        fn new(id: usize, disposals: &Arc<AtomicUsize>) -> Self {
            Self {
                id,
                disposed: AtomicBool::new(false),
                disposals: Arc::clone(disposals),
            }
        }
    }

    #[async_trait]
    impl Dispose for Tracked {
        async fn dispose(&self) {
            if !self.disposed.swap(true, Ordering::SeqCst) {
                self.disposals.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_swap_returns_previous() {
        let slot = ResourceSwap::new("old");
        let retired = slot.swap("new").unwrap();

        assert_eq!(*retired.resource(), "old");
        assert_eq!(slot.load().as_deref(), Some(&"new"));
    }

    #[test]
    fn test_empty_slot() {
        let slot: ResourceSwap<u8> = ResourceSwap::empty();
        assert!(slot.is_empty());
        assert!(slot.load().is_none());
        assert!(slot.swap(1).is_none());
        assert!(!slot.is_empty());
    }

    #[test]
    fn test_take_empties_slot() {
        let slot = ResourceSwap::new(5_u8);
        assert_eq!(*slot.take().unwrap().resource(), 5);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_compare_and_swap_replaces_expected() {
        let slot = ResourceSwap::new(1_u8);
        let current = slot.load().unwrap();

        match slot.compare_and_swap(&current, 2) {
            SwapOutcome::Replaced(retired) => assert_eq!(*retired.resource(), 1),
            SwapOutcome::Lost(_) => panic!("expected replacement"),
        }
        assert_eq!(slot.load().as_deref(), Some(&2));
    }

    #[test]
    fn test_compare_and_swap_loses_to_earlier_replacement() {
        let slot = ResourceSwap::new(1_u8);
        let stale = slot.load().unwrap();
        let _ = slot.swap(2);

        match slot.compare_and_swap(&stale, 3) {
            SwapOutcome::Lost(rejected) => assert_eq!(*rejected.resource(), 3),
            SwapOutcome::Replaced(_) => panic!("stale handle must not win"),
        }
        assert_eq!(slot.load().as_deref(), Some(&2));
    }

    #[test]
    fn test_concurrent_swaps_return_each_previous_once() {
        const THREADS: usize = 16;
        let slot = Arc::new(ResourceSwap::new(0_usize));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (1..=THREADS)
            .map(|id| {
                let slot = Arc::clone(&slot);
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    if let Some(previous) = slot.swap(id) {
                        seen.lock().unwrap().push(*previous.resource());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        let unique: HashSet<_> = seen.iter().copied().collect();
        let last = *slot.load().unwrap();

        assert_eq!(seen.len(), THREADS);
        assert_eq!(unique.len(), THREADS);
        assert!(unique.contains(&0));
        assert!(!unique.contains(&last));
    }

    #[tokio::test]
    async fn test_retired_dispose_runs_once() {
        let disposals = Arc::new(AtomicUsize::new(0));
        let slot = ResourceSwap::new(Tracked::new(1, &disposals));
        let observer = slot.load().unwrap();

        slot.swap(Tracked::new(2, &disposals)).unwrap().dispose().await;
        observer.dispose().await;

        assert!(observer.is_disposed());
        assert_eq!(observer.id, 1);
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(!slot.load().unwrap().is_disposed());
    }
}
